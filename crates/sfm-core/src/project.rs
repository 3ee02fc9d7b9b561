//! Input projects: a directory with an `images/` subtree.

use crate::config::{ImageConfig, LayoutConfig};
use crate::error::IoResultExt;
use crate::{Result, SfmError};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A validated, read-only input project.
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    images_dir: PathBuf,
    images: Vec<PathBuf>,
}

impl Project {
    /// Resolve `project_dir` and check it holds at least one recognized image.
    ///
    /// This is the cheap precondition run before any stage is invoked.
    pub fn open(project_dir: &Path) -> Result<Self> {
        let root = std::path::absolute(project_dir).with_path(project_dir)?;
        let root = root.canonicalize().unwrap_or(root);

        let images_dir = root.join(LayoutConfig::IMAGES_DIR_NAME);
        if !images_dir.is_dir() {
            return Err(SfmError::MissingImagesDir(root));
        }

        let images = collect_images(&images_dir);
        if images.is_empty() {
            return Err(SfmError::NoImages(images_dir));
        }

        Ok(Self {
            root,
            images_dir,
            images,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Image files, sorted.
    pub fn images(&self) -> &[PathBuf] {
        &self.images
    }

    /// Image paths relative to the images directory, sorted.
    pub fn relative_images(&self) -> Vec<String> {
        self.images
            .iter()
            .filter_map(|p| p.strip_prefix(&self.images_dir).ok())
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    /// Write the newline-joined relative image list into `dir`.
    pub fn write_image_list(&self, dir: &Path) -> Result<PathBuf> {
        let list_path = dir.join(LayoutConfig::IMAGE_LIST_FILENAME);
        std::fs::write(&list_path, self.relative_images().join("\n")).with_path(&list_path)?;
        Ok(list_path)
    }
}

fn collect_images(images_dir: &Path) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(images_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && ImageConfig::is_image(e.path()))
        .map(|e| e.into_path())
        .collect();
    images.sort();
    images
}
