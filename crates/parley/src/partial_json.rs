//! Best-effort parsing of JSON documents that are still being streamed
//!
//! Open strings, arrays and objects are closed at the end of the input.
//! Values that cannot be known yet (a number that may still grow, a literal
//! like `tru`, a key without its value) are left out, so successive parses
//! of a growing document only ever add information.
use serde_json::{Map, Number, Value};

#[derive(Debug, PartialEq)]
enum Halt {
    /// The input ended before the value could be read
    Incomplete,
    /// The input is not JSON
    Invalid,
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

/// Parse a possibly truncated JSON document, `None` when nothing usable is present
pub fn parse_partial(input: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(input) {
        return Some(value);
    }
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };
    match parser.value() {
        Ok((value, _)) => Some(value),
        Err(_) => None,
    }
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    /// Returns the value and whether it was read to its end
    fn value(&mut self) -> Result<(Value, bool), Halt> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(Halt::Incomplete),
            Some('{') => self.object(),
            Some('[') => self.array(),
            Some('"') => self.string().map(|(text, done)| (Value::String(text), done)),
            Some('t') => self.literal("true", Value::Bool(true)),
            Some('f') => self.literal("false", Value::Bool(false)),
            Some('n') => self.literal("null", Value::Null),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(_) => Err(Halt::Invalid),
        }
    }

    fn object(&mut self) -> Result<(Value, bool), Halt> {
        self.pos += 1;
        let mut object = Map::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Ok((Value::Object(object), false)),
                Some('}') => {
                    self.pos += 1;
                    return Ok((Value::Object(object), true));
                }
                Some('"') => {}
                Some(_) => return Err(Halt::Invalid),
            }

            let (key, key_done) = self.string()?;
            if !key_done {
                return Ok((Value::Object(object), false));
            }
            self.skip_whitespace();
            match self.peek() {
                None => return Ok((Value::Object(object), false)),
                Some(':') => self.pos += 1,
                Some(_) => return Err(Halt::Invalid),
            }

            match self.value() {
                Err(Halt::Incomplete) => return Ok((Value::Object(object), false)),
                Err(Halt::Invalid) => return Err(Halt::Invalid),
                Ok((value, done)) => {
                    object.insert(key, value);
                    if !done {
                        return Ok((Value::Object(object), false));
                    }
                }
            }

            self.skip_whitespace();
            match self.peek() {
                None => return Ok((Value::Object(object), false)),
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    return Ok((Value::Object(object), true));
                }
                Some(_) => return Err(Halt::Invalid),
            }
        }
    }

    fn array(&mut self) -> Result<(Value, bool), Halt> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Ok((Value::Array(items), false)),
                Some(']') => {
                    self.pos += 1;
                    return Ok((Value::Array(items), true));
                }
                _ => {}
            }

            match self.value() {
                Err(Halt::Incomplete) => return Ok((Value::Array(items), false)),
                Err(Halt::Invalid) => return Err(Halt::Invalid),
                Ok((value, done)) => {
                    items.push(value);
                    if !done {
                        return Ok((Value::Array(items), false));
                    }
                }
            }

            self.skip_whitespace();
            match self.peek() {
                None => return Ok((Value::Array(items), false)),
                Some(',') => self.pos += 1,
                Some(']') => {
                    self.pos += 1;
                    return Ok((Value::Array(items), true));
                }
                Some(_) => return Err(Halt::Invalid),
            }
        }
    }

    fn string(&mut self) -> Result<(String, bool), Halt> {
        self.pos += 1;
        let mut text = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '"' => return Ok((text, true)),
                '\\' => {
                    let Some(escaped) = self.peek() else {
                        return Ok((text, false));
                    };
                    self.pos += 1;
                    match escaped {
                        'n' => text.push('\n'),
                        't' => text.push('\t'),
                        'r' => text.push('\r'),
                        'b' => text.push('\u{8}'),
                        'f' => text.push('\u{c}'),
                        'u' => {
                            let Some(code) = self.hex4()? else {
                                return Ok((text, false));
                            };
                            if !(0xD800..0xDC00).contains(&code) {
                                text.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                                continue;
                            }
                            // a high surrogate is held back until its pair is readable
                            let rest = &self.chars[self.pos..];
                            let head: String = rest.iter().take(2).collect();
                            if rest.len() < 6 && "\\u".starts_with(&head) {
                                self.pos = self.chars.len();
                                return Ok((text, false));
                            }
                            if rest.starts_with(&['\\', 'u']) {
                                let mark = self.pos;
                                self.pos += 2;
                                if let Some(low) = self.hex4()? {
                                    if (0xDC00..0xE000).contains(&low) {
                                        let combined =
                                            0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                                        text.push(char::from_u32(combined).unwrap_or('\u{fffd}'));
                                        continue;
                                    }
                                }
                                self.pos = mark;
                            }
                            text.push('\u{fffd}');
                        }
                        other => text.push(other),
                    }
                }
                other => text.push(other),
            }
        }
        Ok((text, false))
    }

    /// Four hex digits after `\u`, `None` when the input ends first
    fn hex4(&mut self) -> Result<Option<u32>, Halt> {
        if self.pos + 4 > self.chars.len() {
            self.pos = self.chars.len();
            return Ok(None);
        }
        let hex: String = self.chars[self.pos..self.pos + 4].iter().collect();
        self.pos += 4;
        u32::from_str_radix(&hex, 16)
            .map(Some)
            .map_err(|_| Halt::Invalid)
    }

    fn literal(&mut self, word: &str, value: Value) -> Result<(Value, bool), Halt> {
        for expected in word.chars() {
            match self.peek() {
                None => return Err(Halt::Incomplete),
                Some(c) if c == expected => self.pos += 1,
                Some(_) => return Err(Halt::Invalid),
            }
        }
        Ok((value, true))
    }

    fn number(&mut self) -> Result<(Value, bool), Halt> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || "+-.eE".contains(c)) {
            self.pos += 1;
        }
        if self.peek().is_none() {
            // more digits may follow
            return Err(Halt::Incomplete);
        }
        let literal: String = self.chars[start..self.pos].iter().collect();
        let number: Number = serde_json::from_str(&literal).map_err(|_| Halt::Invalid)?;
        Ok((Value::Number(number), true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complete_document() {
        assert_eq!(parse_partial(r#"{"a": [1, 2]}"#), Some(json!({"a": [1, 2]})));
    }

    #[test]
    fn test_open_string_value_is_closed() {
        assert_eq!(
            parse_partial(r#"{"plan": "Search for ind"#),
            Some(json!({"plan": "Search for ind"}))
        );
    }

    #[test]
    fn test_open_array_keeps_finished_items() {
        assert_eq!(
            parse_partial(r#"{"queries": ["induction hobs", "AGA repl"#),
            Some(json!({"queries": ["induction hobs", "AGA repl"]}))
        );
        assert_eq!(
            parse_partial(r#"{"queries": ["induction hobs", "#),
            Some(json!({"queries": ["induction hobs"]}))
        );
    }

    #[test]
    fn test_dangling_key_and_number_are_dropped() {
        assert_eq!(parse_partial(r#"{"facts": [], "numberOf"#), Some(json!({"facts": []})));
        assert_eq!(parse_partial(r#"{"facts": [], "count": 1"#), Some(json!({"facts": []})));
        assert_eq!(parse_partial(r#"{"ok": tr"#), Some(json!({})));
    }

    #[test]
    fn test_growing_document_is_monotonic() {
        let full = r#"{"plan": "p", "queries": ["a", "b"]}"#;
        let mut previous_len = 0;
        for end in 1..=full.len() {
            if let Some(value) = parse_partial(&full[..end]) {
                let len = value.to_string().len();
                assert!(len >= previous_len, "shrunk at {}", &full[..end]);
                previous_len = len;
            }
        }
        assert_eq!(parse_partial(full), Some(json!({"plan": "p", "queries": ["a", "b"]})));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert_eq!(parse_partial("Sure! Here are"), None);
        assert_eq!(parse_partial(""), None);
    }

    #[test]
    fn test_escapes_inside_open_string() {
        assert_eq!(
            parse_partial(r#"{"text": "line\nnext \"quoted"#),
            Some(json!({"text": "line\nnext \"quoted"}))
        );
    }

    #[test]
    fn test_surrogate_pair_waits_for_low_half() {
        let full = r#"{"text": "hi \ud83d\ude00!"}"#;
        let expected = "hi \u{1F600}!";
        let mut previous = String::new();
        for end in 1..=full.len() {
            let Some(value) = parse_partial(&full[..end]) else {
                continue;
            };
            let Some(text) = value["text"].as_str() else {
                continue;
            };
            assert!(
                text.starts_with(previous.as_str()),
                "{:?} does not extend {:?}",
                text,
                previous
            );
            assert!(!text.contains('\u{fffd}'), "replacement char at {}", &full[..end]);
            previous = text.to_string();
        }
        assert_eq!(previous, expected);
    }

    #[test]
    fn test_unpaired_surrogate_becomes_replacement() {
        assert_eq!(
            parse_partial(r#"{"text": "a\ud83dbc"#),
            Some(json!({"text": "a\u{fffd}bc"}))
        );
    }
}
