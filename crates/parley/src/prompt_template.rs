use include_dir::{include_dir, Dir};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tera::{Context, Error as TeraError, Tera};

static PROMPTS: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/prompts");

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered.trim().to_string())
}

/// Render a bundled template by name (`draft.md`), or a template file on disk
pub fn load_prompt_file<T: Serialize>(
    template_file: impl AsRef<Path>,
    context_data: &T,
) -> Result<String, TeraError> {
    let template_path = template_file.as_ref();
    let template_content = match PROMPTS.get_file(template_path) {
        Some(file) => file
            .contents_utf8()
            .ok_or_else(|| TeraError::msg("Bundled template is not UTF-8"))?
            .to_string(),
        None => fs::read_to_string(template_path)
            .map_err(|e| TeraError::chain("Failed to read template file", e))?,
    };
    load_prompt(&template_content, context_data)
}
