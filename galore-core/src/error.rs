use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("unknown gallery command: {0}")]
    UnknownCommand(String),

    #[error("failed to create gallery directory {}: {source}", path.display())]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, GalleryError>;
