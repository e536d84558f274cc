//! Client payload bundling.
//!
//! Every enabled app unit of one type is compiled separately and the results
//! are concatenated in ascending name order, so the same input set always
//! produces the same text and the same fingerprint:
//!
//! ```text
//! const registry = [];
//! const register = (name, config) => ...;
//!
//! // extension: a
//! register("a", (function () { ... })());
//! // extension: b
//! register("b", (function () { ... })());
//!
//! export const manifest = ["a","b"];
//! export default registry;
//! ```
//!
//! An extension that fails to compile is left out with a warning; the rest
//! of the type still builds.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::cancel::CancelToken;
use super::types::{BuiltPayload, ExtensionDescriptor, TypeTag};
use crate::error::{ExtensionError, ExtensionWarning, Result, WarningStage};

/// One input file handed to a [`Compiler`].
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub contents: String,
}

impl SourceFile {
    pub fn read(path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            contents: std::fs::read_to_string(path)?,
        })
    }
}

/// Turns an extension's sources into a scoped module body.
///
/// The body runs inside a function with a local `exports` object and must
/// leave the extension's configuration in `exports.default`.
pub trait Compiler: Send + Sync {
    fn compile(&self, sources: &[SourceFile]) -> Result<String>;
}

/// Compiler for dependency-free ES modules.
///
/// Accepts exactly one `export default` and no `import` statements, checks
/// that brackets balance, and rewrites the export into `exports.default`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleCompiler;

impl Compiler for ModuleCompiler {
    fn compile(&self, sources: &[SourceFile]) -> Result<String> {
        let entry = sources
            .first()
            .ok_or_else(|| ExtensionError::Compile("no source files".to_string()))?;

        check_balanced(&entry.contents)?;

        let mut body = String::with_capacity(entry.contents.len() + 16);
        let mut default_exports = 0usize;

        for (lineno, line) in entry.contents.lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("import ") || trimmed.starts_with("import{") {
                return Err(ExtensionError::Compile(format!(
                    "{}:{}: import statements are not supported, inline dependencies into the entry",
                    entry.path.display(),
                    lineno + 1
                )));
            }
            if let Some(rest) = trimmed.strip_prefix("export default") {
                default_exports += 1;
                let indent = &line[..line.len() - trimmed.len()];
                body.push_str(indent);
                body.push_str("exports.default =");
                body.push_str(rest);
            } else if trimmed.starts_with("export ") || trimmed.starts_with("export{") {
                return Err(ExtensionError::Compile(format!(
                    "{}:{}: only a default export is supported",
                    entry.path.display(),
                    lineno + 1
                )));
            } else {
                body.push_str(line);
            }
            body.push('\n');
        }

        match default_exports {
            1 => Ok(body),
            0 => Err(ExtensionError::Compile(format!(
                "{}: missing default export",
                entry.path.display()
            ))),
            n => Err(ExtensionError::Compile(format!(
                "{}: {} default exports",
                entry.path.display(),
                n
            ))),
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Scan {
    Code,
    LineComment,
    BlockComment,
    Str(char),
}

/// Bracket balance check that skips strings and comments.
fn check_balanced(src: &str) -> Result<()> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut state = Scan::Code;
    let mut line = 1usize;
    let mut chars = src.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            line += 1;
        }
        match state {
            Scan::LineComment => {
                if c == '\n' {
                    state = Scan::Code;
                }
            }
            Scan::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = Scan::Code;
                }
            }
            Scan::Str(quote) => {
                if c == '\\' {
                    if chars.next() == Some('\n') {
                        line += 1;
                    }
                } else if c == quote {
                    state = Scan::Code;
                } else if c == '\n' && quote != '`' {
                    return Err(ExtensionError::Compile(format!(
                        "line {}: unterminated string literal",
                        line - 1
                    )));
                }
            }
            Scan::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    state = Scan::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = Scan::BlockComment;
                }
                '\'' | '"' | '`' => state = Scan::Str(c),
                '(' | '[' | '{' => stack.push((c, line)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, at)) => {
                            return Err(ExtensionError::Compile(format!(
                                "line {}: '{}' does not close '{}' opened on line {}",
                                line, c, open, at
                            )));
                        }
                        None => {
                            return Err(ExtensionError::Compile(format!(
                                "line {}: unexpected '{}'",
                                line, c
                            )));
                        }
                    }
                }
                _ => {}
            },
        }
    }

    if let Scan::Str(_) = state {
        return Err(ExtensionError::Compile("unterminated string literal".to_string()));
    }
    if state == Scan::BlockComment {
        return Err(ExtensionError::Compile("unterminated block comment".to_string()));
    }
    if let Some((open, at)) = stack.pop() {
        return Err(ExtensionError::Compile(format!(
            "line {}: '{}' is never closed",
            at, open
        )));
    }
    Ok(())
}

/// SHA-256 of `text`, hex encoded.
pub fn fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Builds aggregate payloads per type.
#[derive(Clone)]
pub struct Bundler {
    compiler: Arc<dyn Compiler>,
    max_payload_bytes: Option<usize>,
}

impl Bundler {
    pub fn new(compiler: Arc<dyn Compiler>) -> Self {
        Self {
            compiler,
            max_payload_bytes: None,
        }
    }

    pub fn with_max_payload_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_payload_bytes = limit;
        self
    }

    /// Build the payload for `tag` from `descriptors`.
    pub fn build(&self, tag: TypeTag, descriptors: &[ExtensionDescriptor]) -> Result<BuiltPayload> {
        self.build_with_cancel(tag, descriptors, &CancelToken::new())
    }

    /// As [`build`](Self::build), checking `cancel` between extensions.
    pub fn build_with_cancel(
        &self,
        tag: TypeTag,
        descriptors: &[ExtensionDescriptor],
        cancel: &CancelToken,
    ) -> Result<BuiltPayload> {
        let mut units: Vec<&ExtensionDescriptor> =
            descriptors.iter().flat_map(|d| d.app_units(tag)).collect();
        units.sort_by(|a, b| a.name.cmp(&b.name));

        let mut source = String::new();
        source.push_str(&format!("// extensa {} bundle\n", tag));
        source.push_str("const registry = [];\n");
        source.push_str(
            "const register = (name, config) => registry.push(Object.freeze({ name, config }));\n",
        );

        let mut extensions = Vec::with_capacity(units.len());
        let mut warnings = Vec::new();

        for unit in units {
            cancel.check()?;
            match self.compile_unit(unit) {
                Ok(body) => {
                    let name = js_string(&unit.name);
                    source.push_str(&format!("\n// extension: {}\n", unit.name));
                    source.push_str(&format!("register({}, (function () {{\n", name));
                    source.push_str("const exports = {};\n");
                    source.push_str(&body);
                    if !body.ends_with('\n') {
                        source.push('\n');
                    }
                    source.push_str("return exports.default;\n})());\n");
                    extensions.push(unit.name.clone());
                }
                Err(e) => {
                    warn!(category = "extensions", extension = %unit.name, type_tag = %tag, error = %e, "Extension omitted from bundle");
                    warnings.push(ExtensionWarning::new(&unit.name, WarningStage::Compile, e));
                }
            }
        }

        let manifest = serde_json::to_string(&extensions).map_err(|e| ExtensionError::Build {
            type_tag: tag.to_string(),
            reason: e.to_string(),
        })?;
        source.push_str(&format!("\nexport const manifest = {};\n", manifest));
        source.push_str("export default registry;\n");

        if let Some(limit) = self.max_payload_bytes {
            if source.len() > limit {
                return Err(ExtensionError::Build {
                    type_tag: tag.to_string(),
                    reason: format!("payload is {} bytes, limit is {}", source.len(), limit),
                });
            }
        }

        let fingerprint = fingerprint(&source);
        debug!(category = "extensions", type_tag = %tag, count = extensions.len(), fingerprint = %fingerprint, "Built payload");

        Ok(BuiltPayload {
            type_tag: tag,
            source,
            fingerprint,
            built_at: chrono::Utc::now(),
            extensions,
            warnings,
        })
    }

    fn compile_unit(&self, unit: &ExtensionDescriptor) -> Result<String> {
        let entry = unit
            .entry_paths
            .app
            .as_deref()
            .ok_or_else(|| ExtensionError::Compile("no app entry point".to_string()))?;
        let sources = [SourceFile::read(entry)?];

        catch_unwind(AssertUnwindSafe(|| self.compiler.compile(&sources))).unwrap_or_else(|_| {
            Err(ExtensionError::Compile("compiler panicked".to_string()))
        })
    }
}

impl Default for Bundler {
    fn default() -> Self {
        Self::new(Arc::new(ModuleCompiler))
    }
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn source(contents: &str) -> Vec<SourceFile> {
        vec![SourceFile {
            path: PathBuf::from("index.js"),
            contents: contents.to_string(),
        }]
    }

    fn display(dir: &Path, name: &str, js: &str) -> ExtensionDescriptor {
        let path = dir.join(format!("{name}.js"));
        fs::write(&path, js).unwrap();
        ExtensionDescriptor::new(name, TypeTag::Display, dir).with_app_entry(path)
    }

    #[test]
    fn test_module_compiler_rewrites_default_export() {
        let body = ModuleCompiler
            .compile(&source("const id = 'a';\nexport default { id };\n"))
            .unwrap();
        assert!(body.contains("exports.default = { id };"));
        assert!(!body.contains("export default"));
    }

    #[test]
    fn test_module_compiler_rejects_imports_and_named_exports() {
        let err = ModuleCompiler
            .compile(&source("import x from './x';\nexport default x;"))
            .unwrap_err();
        assert!(err.to_string().contains("import statements"));

        let err = ModuleCompiler
            .compile(&source("export const a = 1;\nexport default a;"))
            .unwrap_err();
        assert!(err.to_string().contains("only a default export"));

        let err = ModuleCompiler.compile(&source("const a = 1;")).unwrap_err();
        assert!(err.to_string().contains("missing default export"));
    }

    #[test]
    fn test_balance_check() {
        assert!(check_balanced("export default { a: [1, 2], b: f(') }') };").is_ok());
        assert!(check_balanced("// } stray\nconst a = { /* ] */ };").is_ok());
        assert!(check_balanced("export default { a: 1 ;").is_err());
        assert!(check_balanced("export default { a: (1 };").is_err());
        assert!(check_balanced("const s = 'open;\n").is_err());
    }

    #[test]
    fn test_build_orders_by_name() {
        let tmp = tempfile::tempdir().unwrap();
        let b = display(tmp.path(), "b", "export default { id: 'b' };");
        let a = display(tmp.path(), "a", "export default { id: 'a' };");

        let payload = Bundler::default().build(TypeTag::Display, &[b, a]).unwrap();
        assert_eq!(payload.extensions, vec!["a", "b"]);

        let pos_a = payload.source.find("register(\"a\"").unwrap();
        let pos_b = payload.source.find("register(\"b\"").unwrap();
        assert!(pos_a < pos_b);
        assert!(payload.source.contains("export const manifest = [\"a\",\"b\"];"));
        assert!(payload.warnings.is_empty());
    }

    #[test]
    fn test_build_is_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        let set = vec![
            display(tmp.path(), "x", "export default { id: 'x' };"),
            display(tmp.path(), "y", "export default { id: 'y' };"),
        ];
        let bundler = Bundler::default();

        let first = bundler.build(TypeTag::Display, &set).unwrap();
        let reversed: Vec<_> = set.iter().rev().cloned().collect();
        let second = bundler.build(TypeTag::Display, &reversed).unwrap();

        assert_eq!(first.source, second.source);
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(first.fingerprint, fingerprint(&first.source));
    }

    #[test]
    fn test_compile_failure_is_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let a = display(tmp.path(), "a", "export default { id: 'a' };");
        let b = display(tmp.path(), "b", "export default { id: 'b' ;");

        let payload = Bundler::default().build(TypeTag::Display, &[a, b]).unwrap();
        assert_eq!(payload.extensions, vec!["a"]);
        assert!(payload.source.contains("register(\"a\""));
        assert!(!payload.source.contains("register(\"b\""));
        assert_eq!(payload.warnings.len(), 1);
        assert_eq!(payload.warnings[0].extension, "b");
        assert_eq!(payload.warnings[0].stage, WarningStage::Compile);
    }

    #[test]
    fn test_build_skips_disabled_and_other_types() {
        let tmp = tempfile::tempdir().unwrap();
        let a = display(tmp.path(), "a", "export default {};");
        let off = display(tmp.path(), "off", "export default {};").with_enabled(false);
        let panel_path = tmp.path().join("p.js");
        fs::write(&panel_path, "export default {};").unwrap();
        let panel = ExtensionDescriptor::new("p", TypeTag::Panel, tmp.path()).with_app_entry(panel_path);

        let payload = Bundler::default().build(TypeTag::Display, &[a, off, panel]).unwrap();
        assert_eq!(payload.extensions, vec!["a"]);
    }

    #[test]
    fn test_compiler_panic_is_contained() {
        struct Panicking;
        impl Compiler for Panicking {
            fn compile(&self, _sources: &[SourceFile]) -> Result<String> {
                panic!("boom");
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let a = display(tmp.path(), "a", "export default {};");
        let payload = Bundler::new(Arc::new(Panicking)).build(TypeTag::Display, &[a]).unwrap();
        assert!(payload.extensions.is_empty());
        assert!(payload.warnings[0].message.contains("panicked"));
    }

    #[test]
    fn test_payload_size_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let a = display(tmp.path(), "a", "export default {};");
        let result = Bundler::default()
            .with_max_payload_bytes(Some(16))
            .build(TypeTag::Display, &[a]);
        assert!(matches!(result, Err(ExtensionError::Build { .. })));
    }

    #[test]
    fn test_cancelled_build() {
        let tmp = tempfile::tempdir().unwrap();
        let a = display(tmp.path(), "a", "export default {};");
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = Bundler::default().build_with_cancel(TypeTag::Display, &[a], &cancel);
        assert!(matches!(result, Err(ExtensionError::Cancelled)));
    }
}
