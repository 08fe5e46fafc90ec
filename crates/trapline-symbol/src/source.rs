use std::cell::OnceCell;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use indexmap::map::Entry;

/// Source file referenced by the line table.
///
/// The content is read from disk the first time it is requested.
#[derive(Debug)]
pub struct SourceFile {
    path: PathBuf,
    content: OnceCell<Option<String>>,
}

impl SourceFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            content: OnceCell::new(),
        }
    }

    /// Path of the source file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full text of the source file, or `None` if it cannot be read.
    pub fn text(&self) -> Option<&str> {
        self.content
            .get_or_init(|| {
                std::fs::read_to_string(&self.path)
                    .inspect(|_| tracing::debug!(path = %self.path.display(), "loaded source file"))
                    .inspect_err(|e| {
                        tracing::warn!(error = %e, path = %self.path.display(), "unreadable source file")
                    })
                    .ok()
            })
            .as_deref()
    }

    /// Number of lines in the source file.
    pub fn line_count(&self) -> Option<usize> {
        self.text().map(|text| text.lines().count())
    }

    /// Text of the given 1-based line.
    pub fn line(&self, line: u64) -> Option<&str> {
        let index = usize::try_from(line.checked_sub(1)?).ok()?;
        self.text()?.lines().nth(index)
    }
}

/// Source files of the debugged program, deduplicated by path.
#[derive(Debug, Default)]
pub struct SourceFiles {
    files: IndexMap<PathBuf, SourceFile>,
}

impl SourceFiles {
    /// Returns the index of the given path, registering it if needed.
    pub(crate) fn intern(&mut self, path: PathBuf) -> usize {
        match self.files.entry(path) {
            Entry::Occupied(e) => e.index(),
            Entry::Vacant(v) => {
                let file = SourceFile::new(v.key().clone());
                let index = v.index();
                v.insert(file);
                index
            }
        }
    }

    /// Returns the source file with the given index.
    pub fn get(&self, index: usize) -> Option<&SourceFile> {
        self.files.get_index(index).map(|(_, file)| file)
    }

    /// Returns the index of the source file whose path ends with `suffix`.
    pub fn find(&self, suffix: &Path) -> Option<usize> {
        self.files.keys().position(|path| path.ends_with(suffix))
    }

    /// Number of registered source files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether no source file is registered.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Iterates over the registered source files, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.values()
    }
}
