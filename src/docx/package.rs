use std::io::{Cursor, Read, Seek};

use zip::result::ZipError;
use zip::ZipArchive;

use crate::docx::xml::{parse_xml_part, XmlPart};

pub const DOCUMENT_PART: &str = "word/document.xml";
pub const COMMENTS_PART: &str = "word/comments.xml";
pub const COMMENTS_EXTENDED_PART: &str = "word/commentsExtended.xml";

/// Failure opening the package or one of its parts.
///
/// `PartNotFound` is an expected outcome for optional parts; callers decide
/// whether it means "empty". `MalformedContainer` is never recoverable.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("part not found: {part}")]
    PartNotFound { part: String },
    #[error("malformed container ({part}): {reason}")]
    MalformedContainer { part: String, reason: String },
}

impl ContainerError {
    fn malformed(part: &str, reason: impl std::fmt::Display) -> Self {
        ContainerError::MalformedContainer {
            part: part.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ContainerError::PartNotFound { .. })
    }
}

/// Read-only view over a word-processing package. Parts are read one at a
/// time, each fully consumed before the next is opened.
pub struct DocxPackage<R> {
    zip: ZipArchive<R>,
}

impl DocxPackage<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ContainerError> {
        Self::from_reader(Cursor::new(bytes), "<memory>")
    }
}

impl<R: Read + Seek> DocxPackage<R> {
    pub fn from_reader(reader: R, label: &str) -> Result<Self, ContainerError> {
        let zip = ZipArchive::new(reader).map_err(|e| ContainerError::malformed(label, e))?;
        Ok(Self { zip })
    }

    pub fn has_part(&self, name: &str) -> bool {
        self.zip.index_for_name(name).is_some()
    }

    pub fn read_part_bytes(&mut self, name: &str) -> Result<Vec<u8>, ContainerError> {
        let mut file = match self.zip.by_name(name) {
            Ok(f) => f,
            Err(ZipError::FileNotFound) => {
                return Err(ContainerError::PartNotFound {
                    part: name.to_string(),
                })
            }
            Err(e) => return Err(ContainerError::malformed(name, e)),
        };
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)
            .map_err(|e| ContainerError::malformed(name, e))?;
        Ok(data)
    }

    pub fn open_part(&mut self, name: &str) -> Result<XmlPart, ContainerError> {
        let data = self.read_part_bytes(name)?;
        parse_xml_part(name, &data).map_err(|e| ContainerError::malformed(name, format!("{e:#}")))
    }
}
