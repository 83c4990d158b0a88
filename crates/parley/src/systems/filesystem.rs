use async_trait::async_trait;
use indoc::indoc;
use regex::Regex;
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::errors::{ChatError, ChatResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};
use crate::systems::System;

/// A sandboxed file system. Every path the model passes is interpreted
/// relative to `root`; paths that would leave it are refused.
pub struct FileSystem {
    tools: Vec<Tool>,
    root: PathBuf,
    instructions: String,
}

fn path_schema(field: &str) -> Value {
    json!({
        "type": "object",
        "required": [field],
        "properties": {
            field: {"type": "string", "description": "Path relative to the sandbox root."}
        }
    })
}

impl FileSystem {
    /// `root` may use `~` and environment variables; it is created if missing
    pub async fn new(root: &str) -> ChatResult<Self> {
        let expanded = shellexpand::full(root)
            .map_err(|e| ChatError::Internal(format!("invalid sandbox root '{}': {}", root, e)))?;
        let root = PathBuf::from(expanded.as_ref());
        fs::create_dir_all(&root)
            .await
            .map_err(|e| ChatError::Internal(format!("cannot create sandbox root: {}", e)))?;
        Ok(Self::with_root(root))
    }

    pub fn with_root(root: PathBuf) -> Self {
        let tools = vec![
            Tool::new(
                "writeFile",
                "Write files to the sandboxed file system",
                json!({
                    "type": "object",
                    "required": ["filePath", "content"],
                    "properties": {
                        "filePath": {"type": "string"},
                        "content": {"type": "string"}
                    }
                }),
            ),
            Tool::new(
                "readFile",
                "Read content from a file",
                path_schema("filePath"),
            ),
            Tool::new(
                "deletePath",
                "Delete a file or directory",
                path_schema("pathToDelete"),
            ),
            Tool::new(
                "listDirectory",
                "List contents of a directory",
                path_schema("dirPath"),
            ),
            Tool::new("createDirectory", "Create a directory", path_schema("dirPath")),
            Tool::new(
                "exists",
                "Check if a file or directory exists",
                path_schema("pathToCheck"),
            ),
            Tool::new(
                "searchFiles",
                "Search for files by pattern (simple glob-like search)",
                json!({
                    "type": "object",
                    "required": ["pattern", "searchDir"],
                    "properties": {
                        "pattern": {"type": "string", "description": "File name pattern, `*` and `?` wildcards."},
                        "searchDir": {"type": "string"}
                    }
                }),
            ),
        ];

        let instructions = indoc! {r#"
            You can use a sandboxed file system to create, edit and delete files.
            Use it to record notes, create todo lists and edit documents for the user.
            Use markdown files to store information. All paths are relative to the sandbox root.
        "#}
        .to_string();

        Self {
            tools,
            root,
            instructions,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a model-supplied path into the sandbox without touching the disk
    fn resolve_path(&self, path_str: &str) -> ChatResult<PathBuf> {
        let mut resolved = PathBuf::new();
        for component in Path::new(path_str).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir | Component::RootDir => {}
                Component::ParentDir => {
                    if !resolved.pop() {
                        return Err(outside(path_str));
                    }
                }
                Component::Prefix(_) => return Err(outside(path_str)),
            }
        }
        Ok(self.root.join(resolved))
    }

    /// [`Self::resolve_path`], then follow symlinks through the deepest part
    /// of the path that exists and make sure it still lands under the root
    async fn sandboxed(&self, path_str: &str) -> ChatResult<PathBuf> {
        let target = self.resolve_path(path_str)?;
        let root = fs::canonicalize(&self.root)
            .await
            .map_err(|e| io_error(path_str, e))?;

        let mut existing = target.as_path();
        loop {
            match fs::canonicalize(existing).await {
                Ok(real) if real.starts_with(&root) => return Ok(target),
                Ok(_) => return Err(outside(path_str)),
                Err(e) if e.kind() == ErrorKind::NotFound => match existing.parent() {
                    Some(parent) => existing = parent,
                    None => return Ok(target),
                },
                Err(e) => return Err(io_error(path_str, e)),
            }
        }
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    async fn write_file(&self, path: &str, content: &str) -> ChatResult<Value> {
        let target = self.sandboxed(path).await?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(path, e))?;
        }
        fs::write(&target, content)
            .await
            .map_err(|e| io_error(path, e))?;
        Ok(json!({"success": true, "message": format!("File written: {}", path)}))
    }

    async fn read_file(&self, path: &str) -> ChatResult<Value> {
        let target = self.sandboxed(path).await?;
        let content = fs::read_to_string(&target)
            .await
            .map_err(|e| io_error(path, e))?;
        Ok(json!({"success": true, "content": content}))
    }

    async fn delete_path(&self, path: &str) -> ChatResult<Value> {
        let target = self.sandboxed(path).await?;
        if target == self.root {
            return Err(ChatError::ToolExecution(
                "Refusing to delete the sandbox root".to_string(),
            ));
        }
        let metadata = fs::metadata(&target)
            .await
            .map_err(|e| io_error(path, e))?;
        let removed = if metadata.is_dir() {
            fs::remove_dir_all(&target).await
        } else {
            fs::remove_file(&target).await
        };
        removed.map_err(|e| io_error(path, e))?;
        Ok(json!({"success": true, "message": format!("Deleted: {}", path)}))
    }

    async fn list_directory(&self, path: &str) -> ChatResult<Value> {
        let target = self.sandboxed(path).await?;
        let mut entries = fs::read_dir(&target)
            .await
            .map_err(|e| io_error(path, e))?;

        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(path, e))? {
            let kind = match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => "directory",
                _ => "file",
            };
            items.push((entry.file_name().to_string_lossy().into_owned(), kind));
        }
        items.sort();

        let items: Vec<Value> = items
            .into_iter()
            .map(|(name, kind)| json!({"name": name, "type": kind}))
            .collect();
        Ok(json!({"success": true, "items": items}))
    }

    async fn create_directory(&self, path: &str) -> ChatResult<Value> {
        let target = self.sandboxed(path).await?;
        fs::create_dir_all(&target)
            .await
            .map_err(|e| io_error(path, e))?;
        Ok(json!({"success": true, "message": format!("Directory created: {}", path)}))
    }

    async fn exists(&self, path: &str) -> ChatResult<Value> {
        let target = self.sandboxed(path).await?;
        let exists = fs::try_exists(&target).await.unwrap_or(false);
        Ok(json!({"success": true, "exists": exists}))
    }

    async fn search_files(&self, pattern: &str, dir: &str) -> ChatResult<Value> {
        let start = self.sandboxed(dir).await?;
        let matcher = glob_regex(pattern)?;

        let mut matches = Vec::new();
        let mut pending = vec![start.clone()];
        while let Some(current) = pending.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if current == start => return Err(io_error(dir, e)),
                // unreadable subdirectories are skipped
                Err(_) => continue,
            };
            while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(dir, e))? {
                let path = entry.path();
                if matches!(entry.file_type().await, Ok(t) if t.is_dir()) {
                    pending.push(path.clone());
                }
                if matcher.is_match(&entry.file_name().to_string_lossy()) {
                    matches.push(self.relative(&path));
                }
            }
        }
        matches.sort();
        Ok(json!({"success": true, "matches": matches}))
    }
}

/// Translate a `*`/`?` wildcard pattern into an anchored regex
fn glob_regex(pattern: &str) -> ChatResult<Regex> {
    let mut expression = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }
    expression.push('$');
    Regex::new(&expression)
        .map_err(|e| ChatError::invalid_input("searchFiles", format!("bad pattern: {}", e)))
}

fn outside(path: &str) -> ChatError {
    ChatError::ToolExecution(format!("Path '{}' is outside the sandbox", path))
}

fn io_error(path: &str, error: std::io::Error) -> ChatError {
    let reason = match error.kind() {
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::PermissionDenied => "permission denied".to_string(),
        _ => error.to_string(),
    };
    ChatError::ToolExecution(format!("{}: {}", path, reason))
}

fn required_str<'a>(call: &'a ToolCall, field: &str) -> ChatResult<&'a str> {
    call.arguments
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ChatError::invalid_input(&call.name, format!("Missing '{}' parameter", field)))
}

#[async_trait]
impl System for FileSystem {
    fn name(&self) -> &str {
        "FileSystem"
    }

    fn description(&self) -> &str {
        "Create, read, search and delete files in a sandboxed directory"
    }

    fn instructions(&self) -> &str {
        &self.instructions
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> ChatResult<Vec<Content>> {
        debug!(tool = %tool_call.name, arguments = %tool_call.arguments, "filesystem call");
        let result = match tool_call.name.as_str() {
            "writeFile" => {
                self.write_file(
                    required_str(&tool_call, "filePath")?,
                    required_str(&tool_call, "content")?,
                )
                .await
            }
            "readFile" => self.read_file(required_str(&tool_call, "filePath")?).await,
            "deletePath" => {
                self.delete_path(required_str(&tool_call, "pathToDelete")?)
                    .await
            }
            "listDirectory" => {
                self.list_directory(required_str(&tool_call, "dirPath")?)
                    .await
            }
            "createDirectory" => {
                self.create_directory(required_str(&tool_call, "dirPath")?)
                    .await
            }
            "exists" => self.exists(required_str(&tool_call, "pathToCheck")?).await,
            "searchFiles" => {
                self.search_files(
                    required_str(&tool_call, "pattern")?,
                    required_str(&tool_call, "searchDir")?,
                )
                .await
            }
            _ => Err(ChatError::ToolNotFound(tool_call.name.clone())),
        }?;
        Ok(vec![Content::text(result.to_string())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileSystem) {
        let dir = tempfile::tempdir().unwrap();
        let system = FileSystem::with_root(dir.path().to_path_buf());
        (dir, system)
    }

    async fn call(system: &FileSystem, name: &str, arguments: Value) -> ChatResult<Value> {
        let contents = system.call(ToolCall::new(name, arguments)).await?;
        Ok(serde_json::from_str(contents[0].as_text().unwrap()).unwrap())
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_dir, system) = setup();
        call(
            &system,
            "writeFile",
            json!({"filePath": "notes/todo.md", "content": "- buy milk"}),
        )
        .await
        .unwrap();

        let result = call(&system, "readFile", json!({"filePath": "notes/todo.md"}))
            .await
            .unwrap();
        assert_eq!(result["content"], "- buy milk");
    }

    #[tokio::test]
    async fn test_paths_cannot_escape_root() {
        let (_dir, system) = setup();
        let result = call(&system, "readFile", json!({"filePath": "../../etc/passwd"})).await;
        assert!(matches!(result, Err(ChatError::ToolExecution(msg)) if msg.contains("outside the sandbox")));

        // absolute paths are re-rooted
        let resolved = system.resolve_path("/notes/a.md").unwrap();
        assert!(resolved.starts_with(system.root()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_cannot_escape_root() {
        let (dir, system) = setup();
        let elsewhere = tempfile::tempdir().unwrap();
        std::fs::write(elsewhere.path().join("secret.txt"), "hunter2").unwrap();
        std::os::unix::fs::symlink(elsewhere.path(), dir.path().join("link")).unwrap();

        let read = call(&system, "readFile", json!({"filePath": "link/secret.txt"})).await;
        assert!(matches!(read, Err(ChatError::ToolExecution(msg)) if msg.contains("outside the sandbox")));

        let write = call(
            &system,
            "writeFile",
            json!({"filePath": "link/new/planted.txt", "content": "x"}),
        )
        .await;
        assert!(write.is_err());
        assert!(!elsewhere.path().join("new").exists());

        // links that stay inside are fine
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::fs::write(dir.path().join("real/a.md"), "inside").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("alias")).unwrap();
        let result = call(&system, "readFile", json!({"filePath": "alias/a.md"}))
            .await
            .unwrap();
        assert_eq!(result["content"], "inside");
    }

    #[tokio::test]
    async fn test_missing_file_is_a_tool_error() {
        let (_dir, system) = setup();
        let result = call(&system, "readFile", json!({"filePath": "nope.md"})).await;
        assert_eq!(result, Err(ChatError::ToolExecution("nope.md: not found".into())));
    }

    #[tokio::test]
    async fn test_directories_exists_and_delete() {
        let (_dir, system) = setup();
        call(&system, "createDirectory", json!({"dirPath": "projects/a"}))
            .await
            .unwrap();
        call(
            &system,
            "writeFile",
            json!({"filePath": "projects/readme.md", "content": "# Projects"}),
        )
        .await
        .unwrap();

        let listing = call(&system, "listDirectory", json!({"dirPath": "projects"}))
            .await
            .unwrap();
        assert_eq!(
            listing["items"],
            json!([
                {"name": "a", "type": "directory"},
                {"name": "readme.md", "type": "file"}
            ])
        );

        let exists = call(&system, "exists", json!({"pathToCheck": "projects/a"}))
            .await
            .unwrap();
        assert_eq!(exists["exists"], true);

        call(&system, "deletePath", json!({"pathToDelete": "projects"}))
            .await
            .unwrap();
        let exists = call(&system, "exists", json!({"pathToCheck": "projects"}))
            .await
            .unwrap();
        assert_eq!(exists["exists"], false);

        let root = call(&system, "deletePath", json!({"pathToDelete": "."})).await;
        assert!(root.is_err());
    }

    #[tokio::test]
    async fn test_search_files_recurses() {
        let (_dir, system) = setup();
        for path in ["a.md", "notes/b.md", "notes/deep/c.md", "notes/d.txt"] {
            call(&system, "writeFile", json!({"filePath": path, "content": ""}))
                .await
                .unwrap();
        }

        let result = call(
            &system,
            "searchFiles",
            json!({"pattern": "*.md", "searchDir": "notes"}),
        )
        .await
        .unwrap();
        assert_eq!(result["matches"], json!(["notes/b.md", "notes/deep/c.md"]));

        let result = call(&system, "searchFiles", json!({"pattern": "?.txt", "searchDir": "."}))
            .await
            .unwrap();
        assert_eq!(result["matches"], json!(["notes/d.txt"]));
    }

    #[tokio::test]
    async fn test_new_expands_and_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("sandbox");
        let system = FileSystem::new(root.to_str().unwrap()).await.unwrap();
        assert!(system.root().is_dir());
    }
}
