//! Supported languages and how to build and launch each of them.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::JudgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    Java,
    Python,
    JavaScript,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::C,
        Language::Cpp,
        Language::Java,
        Language::Python,
        Language::JavaScript,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Python => "python",
            Language::JavaScript => "javascript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for Language {
    type Err = JudgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" => Ok(Language::C),
            "cpp" | "c++" | "cxx" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            "python" | "python3" | "py" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            _ => Err(JudgeError::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// An argv with `{source}`, `{class}` and `{memory}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate(Vec<String>);

impl CommandTemplate {
    pub fn parse(command: &str) -> Option<Self> {
        let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        if argv.is_empty() { None } else { Some(Self(argv)) }
    }

    fn render(&self, source: &str, class: &str, memory_mb: u64) -> Vec<String> {
        let memory = memory_mb.to_string();
        self.0
            .iter()
            .map(|arg| {
                arg.replace("{source}", source)
                    .replace("{class}", class)
                    .replace("{memory}", &memory)
            })
            .collect()
    }
}

/// How the source file must be named inside the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceNaming {
    Fixed(&'static str),
    /// `javac` insists that a public class lives in `<Name>.java`.
    JavaPublicClass { fallback: &'static str },
}

/// Everything needed to materialise and launch one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub source_file: String,
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LanguageProfile {
    pub language: Language,
    pub compile: Option<CommandTemplate>,
    pub run: CommandTemplate,
    pub source_naming: SourceNaming,
    pub default_timeout_ms: u64,
    pub default_memory_mb: u64,
    /// Whether `RLIMIT_AS` can be applied. Runtimes that reserve large
    /// virtual regions up front (JVM, V8) get their heap capped by flags instead.
    pub address_space_limit: bool,
}

impl LanguageProfile {
    fn builtin(language: Language) -> Self {
        let template = |cmd: &str| CommandTemplate::parse(cmd).unwrap_or(CommandTemplate(Vec::new()));
        match language {
            Language::C => Self {
                language,
                compile: Some(template("gcc -O2 -std=c11 -o main {source} -lm")),
                run: template("./main"),
                source_naming: SourceNaming::Fixed("main.c"),
                default_timeout_ms: 5_000,
                default_memory_mb: 256,
                address_space_limit: true,
            },
            Language::Cpp => Self {
                language,
                compile: Some(template("g++ -O2 -std=c++17 -o main {source}")),
                run: template("./main"),
                source_naming: SourceNaming::Fixed("main.cpp"),
                default_timeout_ms: 5_000,
                default_memory_mb: 256,
                address_space_limit: true,
            },
            Language::Java => Self {
                language,
                compile: Some(template("javac -encoding UTF-8 {source}")),
                run: template("java -Xmx{memory}m -Xss64m -XX:+UseSerialGC -cp . {class}"),
                source_naming: SourceNaming::JavaPublicClass { fallback: "Main" },
                default_timeout_ms: 10_000,
                default_memory_mb: 512,
                address_space_limit: false,
            },
            Language::Python => Self {
                language,
                compile: None,
                run: template("python3 {source}"),
                source_naming: SourceNaming::Fixed("main.py"),
                default_timeout_ms: 5_000,
                default_memory_mb: 256,
                address_space_limit: true,
            },
            Language::JavaScript => Self {
                language,
                compile: None,
                run: template("node --max-old-space-size={memory} {source}"),
                source_naming: SourceNaming::Fixed("main.js"),
                default_timeout_ms: 5_000,
                default_memory_mb: 256,
                address_space_limit: false,
            },
        }
    }

    pub fn requires_compilation(&self) -> bool {
        self.compile.is_some()
    }

    pub fn source_file_name(&self, code: &str) -> String {
        match &self.source_naming {
            SourceNaming::Fixed(name) => name.to_string(),
            SourceNaming::JavaPublicClass { fallback } => {
                let class = detect_public_class(code).unwrap_or_else(|| fallback.to_string());
                format!("{}.java", class)
            }
        }
    }

    pub fn plan(&self, code: &str, memory_mb: u64) -> LaunchPlan {
        let source_file = self.source_file_name(code);
        let class = source_file
            .rsplit_once('.')
            .map(|(stem, _)| stem.to_string())
            .unwrap_or_else(|| source_file.clone());

        LaunchPlan {
            compile: self
                .compile
                .as_ref()
                .map(|cmd| cmd.render(&source_file, &class, memory_mb)),
            run: self.run.render(&source_file, &class, memory_mb),
            source_file,
        }
    }
}

/// Finds the name of the first top-level `public class`. Comments and
/// string/char literals are blanked out first so they cannot spoof a match.
pub fn detect_public_class(code: &str) -> Option<String> {
    let stripped = strip_comments_and_literals(code);
    let tokens: Vec<&str> = stripped
        .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .filter(|t| !t.is_empty())
        .collect();

    let mut i = 0;
    while i < tokens.len() {
        if tokens[i] == "public" {
            let mut j = i + 1;
            while j < tokens.len() && matches!(tokens[j], "final" | "abstract" | "strictfp") {
                j += 1;
            }
            if j + 1 < tokens.len() && tokens[j] == "class" && is_java_identifier(tokens[j + 1]) {
                return Some(tokens[j + 1].to_string());
            }
        }
        i += 1;
    }
    None
}

fn is_java_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    name.len() <= 255 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn strip_comments_and_literals(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut chars = code.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            '"' | '\'' => {
                let quote = c;
                let mut escaped = false;
                for c in chars.by_ref() {
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == quote {
                        break;
                    }
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}

/// Toolchain overrides read from configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LanguageOverride {
    pub compile: Option<String>,
    pub run: Option<String>,
    pub timeout_ms: Option<u64>,
    pub memory_mb: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageInfo {
    pub id: &'static str,
    pub compiled: bool,
    pub default_timeout_ms: u64,
    pub default_memory_mb: u64,
}

/// Allowlist of languages the judge will accept.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: HashMap<Language, LanguageProfile>,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        let profiles = Language::ALL
            .iter()
            .map(|&language| (language, LanguageProfile::builtin(language)))
            .collect();
        Self { profiles }
    }
}

impl LanguageRegistry {
    /// Builds the registry from configuration: `default_timeout_ms` applies to
    /// every language, then per-language overrides are layered on top.
    pub fn with_overrides(
        default_timeout_ms: u64,
        overrides: &HashMap<String, LanguageOverride>,
    ) -> Result<Self, JudgeError> {
        let mut registry = Self::default();
        for profile in registry.profiles.values_mut() {
            profile.default_timeout_ms = default_timeout_ms;
        }

        for (id, over) in overrides {
            let language: Language = id.parse()?;
            let Some(profile) = registry.profiles.get_mut(&language) else {
                continue;
            };

            if let Some(compile) = &over.compile {
                profile.compile = CommandTemplate::parse(compile);
            }
            if let Some(run) = &over.run {
                profile.run = CommandTemplate::parse(run).ok_or_else(|| {
                    JudgeError::Internal(format!("empty run command configured for {}", language))
                })?;
            }
            if let Some(timeout) = over.timeout_ms {
                profile.default_timeout_ms = timeout;
            }
            if let Some(memory) = over.memory_mb {
                profile.default_memory_mb = memory;
            }
            tracing::info!(language = %language, "applied toolchain override");
        }

        Ok(registry)
    }

    pub fn resolve(&self, id: &str) -> Result<&LanguageProfile, JudgeError> {
        let language: Language = id.parse()?;
        self.profiles
            .get(&language)
            .ok_or_else(|| JudgeError::UnsupportedLanguage(id.to_string()))
    }

    pub fn list(&self) -> Vec<LanguageInfo> {
        Language::ALL
            .iter()
            .filter_map(|language| self.profiles.get(language))
            .map(|profile| LanguageInfo {
                id: profile.language.id(),
                compiled: profile.requires_compilation(),
                default_timeout_ms: profile.default_timeout_ms,
                default_memory_mb: profile.default_memory_mb,
            })
            .collect()
    }
}
