//! Build context for an image definition.
//!
//! The archive sent to the engine is packed from the image snapshot held in
//! memory. The copy written under the images directory is never read back,
//! so builds sharing a tag cannot see each other's definitions.

use dockyard_common::Image;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub const DOCKERFILE_NAME: &str = "Dockerfile";

#[derive(Debug, Clone)]
pub struct BuildContext {
    dockerfile: String,
    dockerfile_path: PathBuf,
}

impl BuildContext {
    /// Capture `image` and write its Dockerfile to `<images_dir>/<tag>/Dockerfile`.
    pub fn materialize(images_dir: &Path, image: &Image) -> io::Result<Self> {
        let tag = image.tag();
        if !is_single_component(&tag) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("image name '{}' cannot be used as a directory name", image.name),
            ));
        }

        let dockerfile = image.dockerfile();
        let dir = images_dir.join(&tag);
        fs::create_dir_all(&dir)?;
        let dockerfile_path = dir.join(DOCKERFILE_NAME);
        fs::write(&dockerfile_path, &dockerfile)?;
        debug!(path = %dockerfile_path.display(), "Build context written");

        Ok(Self {
            dockerfile,
            dockerfile_path,
        })
    }

    /// Where the on-disk copy was written.
    pub fn dockerfile_path(&self) -> &Path {
        &self.dockerfile_path
    }

    /// Uncompressed tar archive with the Dockerfile at its root.
    pub fn to_tar(&self) -> io::Result<Vec<u8>> {
        let data = self.dockerfile.as_bytes();
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);

        let mut builder = tar::Builder::new(Vec::new());
        builder.append_data(&mut header, DOCKERFILE_NAME, data)?;
        builder.into_inner()
    }
}

fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::Arc;

    fn image(name: &str) -> Image {
        Image {
            id: 1,
            name: name.to_string(),
            base: "alpine:3.18".to_string(),
            code: "RUN echo hi".to_string(),
        }
    }

    fn archived_dockerfile(bytes: &[u8]) -> Option<String> {
        let mut archive = tar::Archive::new(bytes);
        for entry in archive.entries().ok()? {
            let mut entry = entry.ok()?;
            if entry.path().ok()? == Path::new(DOCKERFILE_NAME) {
                let mut contents = String::new();
                entry.read_to_string(&mut contents).ok()?;
                return Some(contents);
            }
        }
        None
    }

    #[test]
    fn test_materialize_writes_dockerfile() {
        let root = tempfile::tempdir().unwrap();
        let context = BuildContext::materialize(root.path(), &image("demo app")).unwrap();

        assert_eq!(
            context.dockerfile_path(),
            root.path().join("demo_app").join(DOCKERFILE_NAME)
        );
        let written = fs::read_to_string(context.dockerfile_path()).unwrap();
        assert_eq!(written, "FROM alpine:3.18\nRUN echo hi");
    }

    #[test]
    fn test_materialize_overwrites_previous_definition() {
        let root = tempfile::tempdir().unwrap();
        BuildContext::materialize(root.path(), &image("demo")).unwrap();

        let mut changed = image("demo");
        changed.code = "RUN echo bye".to_string();
        let context = BuildContext::materialize(root.path(), &changed).unwrap();

        let written = fs::read_to_string(context.dockerfile_path()).unwrap();
        assert!(written.ends_with("RUN echo bye"));
    }

    #[test]
    fn test_rejects_path_like_names() {
        let root = tempfile::tempdir().unwrap();
        for name in ["../escape", "a/b", "..", "/abs"] {
            let err = BuildContext::materialize(root.path(), &image(name)).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{name}");
        }
    }

    #[test]
    fn test_tar_contains_dockerfile_at_root() {
        let root = tempfile::tempdir().unwrap();
        let context = BuildContext::materialize(root.path(), &image("demo")).unwrap();
        let bytes = context.to_tar().unwrap();

        assert_eq!(
            archived_dockerfile(&bytes).as_deref(),
            Some("FROM alpine:3.18\nRUN echo hi")
        );
    }

    #[test]
    fn test_archive_ignores_later_disk_changes() {
        let root = tempfile::tempdir().unwrap();
        let context = BuildContext::materialize(root.path(), &image("demo")).unwrap();
        fs::write(context.dockerfile_path(), "FROM scratch").unwrap();

        let bytes = context.to_tar().unwrap();
        assert_eq!(
            archived_dockerfile(&bytes).as_deref(),
            Some("FROM alpine:3.18\nRUN echo hi")
        );
    }

    #[test]
    fn test_concurrent_builds_with_same_tag_keep_their_definition() {
        let root = Arc::new(tempfile::tempdir().unwrap());

        let workers: Vec<_> = ["RUN echo first", "RUN echo second"]
            .into_iter()
            .map(|code| {
                let root = root.clone();
                std::thread::spawn(move || {
                    let mut def = image("demo");
                    def.code = code.to_string();
                    let expected = def.dockerfile();

                    let mut mismatches = 0;
                    for _ in 0..500 {
                        let context = BuildContext::materialize(root.path(), &def).unwrap();
                        let bytes = context.to_tar().unwrap();
                        if archived_dockerfile(&bytes).as_deref() != Some(expected.as_str()) {
                            mismatches += 1;
                        }
                    }
                    mismatches
                })
            })
            .collect();

        for worker in workers {
            assert_eq!(worker.join().unwrap(), 0);
        }
    }
}
