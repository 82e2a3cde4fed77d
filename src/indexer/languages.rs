/// Extension → language tag mapping for indexable files.
pub struct LanguageConfig {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
}

const LANGUAGES: &[LanguageConfig] = &[
    LanguageConfig { name: "go", extensions: &["go"] },
    LanguageConfig { name: "javascript", extensions: &["js", "jsx", "mjs", "cjs"] },
    LanguageConfig { name: "typescript", extensions: &["ts", "tsx", "mts", "cts"] },
    LanguageConfig { name: "python", extensions: &["py", "pyi"] },
    LanguageConfig { name: "java", extensions: &["java"] },
    LanguageConfig { name: "c", extensions: &["c", "h"] },
    LanguageConfig { name: "cpp", extensions: &["cc", "cpp", "cxx", "hh", "hpp", "hxx"] },
    LanguageConfig { name: "csharp", extensions: &["cs"] },
    LanguageConfig { name: "php", extensions: &["php"] },
    LanguageConfig { name: "ruby", extensions: &["rb"] },
    LanguageConfig { name: "swift", extensions: &["swift"] },
    LanguageConfig { name: "kotlin", extensions: &["kt", "kts"] },
    LanguageConfig { name: "rust", extensions: &["rs"] },
    LanguageConfig { name: "scala", extensions: &["scala", "sc"] },
    LanguageConfig { name: "shell", extensions: &["sh", "bash", "zsh", "fish", "ps1"] },
    LanguageConfig { name: "sql", extensions: &["sql"] },
    LanguageConfig { name: "html", extensions: &["html", "htm"] },
    LanguageConfig { name: "css", extensions: &["css", "scss", "sass", "less"] },
    LanguageConfig { name: "xml", extensions: &["xml"] },
    LanguageConfig { name: "yaml", extensions: &["yaml", "yml"] },
    LanguageConfig { name: "json", extensions: &["json"] },
    LanguageConfig { name: "toml", extensions: &["toml"] },
    LanguageConfig { name: "markdown", extensions: &["md", "markdown"] },
    LanguageConfig { name: "text", extensions: &["txt"] },
];

/// Well-known extensionless (or oddly named) build and config files.
const SPECIAL_FILES: &[(&str, &str)] = &[
    ("Dockerfile", "dockerfile"),
    ("Makefile", "makefile"),
    ("GNUmakefile", "makefile"),
    ("Gemfile", "ruby"),
    ("Rakefile", "ruby"),
    ("Vagrantfile", "ruby"),
    ("Jenkinsfile", "groovy"),
    ("Procfile", "text"),
    ("CMakeLists.txt", "cmake"),
    ("BUILD", "starlark"),
    ("WORKSPACE", "starlark"),
    ("go.mod", "go"),
    (".gitignore", "gitignore"),
    (".dockerignore", "gitignore"),
    (".editorconfig", "editorconfig"),
];

impl LanguageConfig {
    pub fn get_all() -> &'static [LanguageConfig] {
        LANGUAGES
    }

    pub fn get_by_extension(ext: &str) -> Option<&'static LanguageConfig> {
        let ext = ext.to_ascii_lowercase();
        LANGUAGES.iter().find(|c| c.extensions.contains(&ext.as_str()))
    }

    pub fn get_by_name(name: &str) -> Option<&'static LanguageConfig> {
        LANGUAGES.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Language of a special file, matched on its basename.
pub fn special_file_language(basename: &str) -> Option<&'static str> {
    SPECIAL_FILES
        .iter()
        .find(|(name, _)| *name == basename)
        .map(|(_, lang)| *lang)
}

/// Detect the language tag for a repo-relative path.
pub fn detect_language(path: &str) -> Option<&'static str> {
    let basename = path.rsplit('/').next().unwrap_or(path);
    if let Some(lang) = special_file_language(basename) {
        return Some(lang);
    }
    let (stem, ext) = basename.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    LanguageConfig::get_by_extension(ext).map(|c| c.name)
}
