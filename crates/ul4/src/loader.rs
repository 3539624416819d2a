use std::fs;
use std::io;

use camino::Utf8PathBuf;
use rustc_hash::FxHashMap;
use tracing::debug;
use tracing::warn;
use ul4_conf::Settings;

use crate::error::Error;
use crate::template::CompileOptions;
use crate::template::Template;

/// Finds templates by name in the configured template directories.
///
/// `name` resolves to `<dir>/<name>.<extension>` in the first directory that
/// has it. Compiled templates are cached until [`TemplateLoader::clear`].
pub struct TemplateLoader {
    settings: Settings,
    cache: FxHashMap<String, Template>,
}

impl TemplateLoader {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            cache: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn get(&mut self, name: &str) -> Result<Template, Error> {
        if let Some(template) = self.cache.get(name) {
            debug!(name, "template cache hit");
            return Ok(template.clone());
        }
        debug!(name, "template cache miss");

        let path = self.find(name)?;
        let source = fs::read_to_string(&path).map_err(|err| Error::Io {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        let options = CompileOptions::from(&self.settings).with_name(name);
        let template = Template::compile_with(&source, &options)?;
        debug!(name, %path, "loaded template");

        self.cache.insert(name.to_string(), template.clone());
        Ok(template)
    }

    /// Forgets every compiled template.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    fn find(&self, name: &str) -> Result<Utf8PathBuf, Error> {
        let file_name = format!("{name}.{}", self.settings.extension());
        for dir in self.settings.template_dirs() {
            if !dir.is_dir() {
                warn!(%dir, "template directory does not exist");
                continue;
            }
            let path = dir.join(&file_name);
            match fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() => return Ok(path),
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(Error::Io {
                        path: path.to_string(),
                        message: err.to_string(),
                    })
                }
            }
        }
        let searched = self
            .settings
            .template_dirs()
            .iter()
            .map(|dir| dir.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Err(Error::TemplateNotFound {
            name: name.to_string(),
            searched,
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use tempfile::TempDir;
    use ul4_conf::Whitespace;

    use super::*;

    fn dir_path(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    fn loader(dirs: &[&TempDir]) -> TemplateLoader {
        let settings = Settings::default().with_template_dirs(dirs.iter().map(|dir| dir_path(dir)).collect());
        TemplateLoader::new(settings)
    }

    #[test]
    fn test_first_directory_wins() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        fs::write(first.path().join("page.ul4"), "first").unwrap();
        fs::write(second.path().join("page.ul4"), "second").unwrap();
        fs::write(second.path().join("other.ul4"), "other").unwrap();

        let mut loader = loader(&[&first, &second]);
        assert_eq!(loader.get("page").unwrap().renders(()).unwrap(), "first");
        assert_eq!(loader.get("other").unwrap().renders(()).unwrap(), "other");
    }

    #[test]
    fn test_templates_are_cached() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("page.ul4"), "v1").unwrap();
        let mut loader = loader(&[&dir]);
        let template = loader.get("page").unwrap();
        assert_eq!(template.name(), Some("page"));

        fs::write(dir.path().join("page.ul4"), "v2").unwrap();
        assert!(loader.get("page").unwrap().ptr_eq(&template));

        loader.clear();
        assert_eq!(loader.get("page").unwrap().renders(()).unwrap(), "v2");
    }

    #[test]
    fn test_uses_configured_whitespace() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("page.ul4"), "<?if 1?>\n\tx\n<?end if?>\n").unwrap();
        let settings = Settings::default()
            .with_whitespace(Whitespace::Strip)
            .with_template_dirs(vec![dir_path(&dir)]);
        let mut loader = TemplateLoader::new(settings);
        assert_eq!(loader.get("page").unwrap().renders(()).unwrap(), "x\n");
    }

    #[test]
    fn test_not_found_lists_directories() {
        let dir = tempdir().unwrap();
        let mut loader = loader(&[&dir]);
        let err = loader.get("missing").unwrap_err();
        let Error::TemplateNotFound { name, searched } = &err else {
            panic!("expected TemplateNotFound, got {err:?}");
        };
        assert_eq!(name, "missing");
        assert!(searched.contains(dir_path(&dir).as_str()));
    }

    #[test]
    fn test_compile_errors_are_located() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.ul4"), "<?for x in y?>").unwrap();
        let mut loader = loader(&[&dir]);
        let err = loader.get("broken").unwrap_err();
        assert_eq!(err.locations()[0].template_name(), Some("broken"));
    }
}
