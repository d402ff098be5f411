use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Read access to a folder of files fetched back from a finished job.
pub trait RetrievedFiles {
    /// Relative, `/`-separated names of every stored file.
    fn list_object_names(&self) -> Vec<String>;

    fn read_object(&self, name: &str) -> io::Result<Vec<u8>>;

    fn contains(&self, name: &str) -> bool {
        self.list_object_names().iter().any(|stored| stored == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryRetrieved {
    objects: BTreeMap<String, Vec<u8>>,
}

impl InMemoryRetrieved {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(name, content);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.objects.insert(name.into(), content.into());
    }
}

impl RetrievedFiles for InMemoryRetrieved {
    fn list_object_names(&self) -> Vec<String> {
        self.objects.keys().cloned().collect()
    }

    fn read_object(&self, name: &str) -> io::Result<Vec<u8>> {
        self.objects.get(name).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("object '{name}' is not in the retrieved folder"),
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRetrieved {
    root: PathBuf,
}

impl DirectoryRetrieved {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl RetrievedFiles for DirectoryRetrieved {
    fn list_object_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        collect_names(&self.root, "", &mut names);
        names.sort();
        names
    }

    fn read_object(&self, name: &str) -> io::Result<Vec<u8>> {
        let relative: PathBuf = name.split('/').collect();
        fs::read(self.root.join(relative))
    }
}

/// Links to directories are not followed; links to files are listed.
fn collect_names(directory: &Path, prefix: &str, names: &mut Vec<String>) {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(error) => {
            tracing::warn!(directory = %directory.display(), %error, "cannot list retrieved folder");
            return;
        }
    };
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(directory = %directory.display(), %error, "skipping unreadable entry");
                continue;
            }
        };
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(error) => {
                tracing::warn!(path = %entry.path().display(), %error, "skipping entry of unknown type");
                continue;
            }
        };
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let name = if prefix.is_empty() {
            file_name
        } else {
            format!("{prefix}/{file_name}")
        };
        if file_type.is_dir() {
            collect_names(&entry.path(), &name, names);
        } else if file_type.is_symlink() {
            if entry.path().is_file() {
                names.push(name);
            } else {
                tracing::debug!(name = %name, "not following directory link");
            }
        } else {
            names.push(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DirectoryRetrieved, InMemoryRetrieved, RetrievedFiles};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn in_memory_folder_lists_sorted_names() {
        let retrieved = InMemoryRetrieved::new()
            .with_object("aiida.out", "done")
            .with_object("data-file-schema.xml", "<x/>");
        assert_eq!(
            retrieved.list_object_names(),
            vec!["aiida.out".to_string(), "data-file-schema.xml".to_string()]
        );
        assert_eq!(retrieved.read_object("aiida.out").expect("read"), b"done");
        assert!(retrieved.read_object("missing").is_err());
    }

    #[test]
    fn directory_folder_walks_subdirectories() {
        let temp = TempDir::new().expect("tempdir should be created");
        fs::create_dir_all(temp.path().join("K00001")).expect("subdir");
        fs::write(temp.path().join("aiida.out"), "stdout").expect("write stdout");
        fs::write(temp.path().join("K00001").join("eigenval.xml"), "<Root/>")
            .expect("write eigenvalues");

        let retrieved = DirectoryRetrieved::new(temp.path());
        assert_eq!(
            retrieved.list_object_names(),
            vec!["K00001/eigenval.xml".to_string(), "aiida.out".to_string()]
        );
        assert!(retrieved.contains("K00001/eigenval.xml"));
        assert_eq!(
            retrieved.read_object("K00001/eigenval.xml").expect("read"),
            b"<Root/>"
        );
    }

    #[cfg(unix)]
    #[test]
    fn directory_links_are_not_followed() {
        let temp = TempDir::new().expect("tempdir should be created");
        fs::write(temp.path().join("aiida.out"), "stdout").expect("write stdout");
        std::os::unix::fs::symlink(temp.path(), temp.path().join("loop")).expect("dir link");
        std::os::unix::fs::symlink(temp.path().join("aiida.out"), temp.path().join("copy.out"))
            .expect("file link");

        let retrieved = DirectoryRetrieved::new(temp.path());
        assert_eq!(
            retrieved.list_object_names(),
            vec!["aiida.out".to_string(), "copy.out".to_string()]
        );
    }

    #[test]
    fn missing_directory_lists_nothing() {
        let temp = TempDir::new().expect("tempdir should be created");
        let retrieved = DirectoryRetrieved::new(temp.path().join("absent"));
        assert!(retrieved.list_object_names().is_empty());
    }
}
