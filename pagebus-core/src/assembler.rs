//! Barcode-separated PDF assembly.
//!
//! Pages are accumulated in push order. A page whose prefix equals the current
//! barcode separator closes the document: the accumulated pages are rendered and
//! returned together with every consumed file (separator pages included). A page
//! whose file type differs from the first page of the sequence breaks it.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::contract::{AssemblyEvent, BrokenReason, DocumentAssembler, FinishedDocument, PageRenderer};
use crate::render::PdfRenderer;
use crate::sequencer::SourceFile;
use crate::settings::SettingsHandle;

pub struct PdfAssembler {
    renderer: Box<dyn PageRenderer>,
    settings: SettingsHandle,
    pages: Vec<PathBuf>,
    separators: Vec<PathBuf>,
    extension: Option<String>,
}

impl PdfAssembler {
    pub fn new(settings: SettingsHandle) -> Self {
        Self::with_renderer(settings, Box::new(PdfRenderer::default()))
    }

    pub fn with_renderer(settings: SettingsHandle, renderer: Box<dyn PageRenderer>) -> Self {
        Self {
            renderer,
            settings,
            pages: Vec::new(),
            separators: Vec::new(),
            extension: None,
        }
    }

    fn accumulated(&self) -> Vec<PathBuf> {
        self.separators
            .iter()
            .chain(self.pages.iter())
            .cloned()
            .collect()
    }

    fn finish(&mut self) -> AssemblyEvent {
        match self.renderer.render(&self.pages) {
            Ok(payload) => {
                info!(pages = self.pages.len(), size = payload.len(), "[ASSEMBLE] Document ready");
                AssemblyEvent::Ready(FinishedDocument {
                    payload,
                    consumed: self.accumulated(),
                })
            }
            Err(e) => {
                warn!(error = %e, pages = self.pages.len(), "[ASSEMBLE] Rendering failed, breaking sequence");
                AssemblyEvent::SequenceBroken {
                    files: self.accumulated(),
                    reason: BrokenReason::RenderFailed(e.to_string()),
                }
            }
        }
    }
}

impl DocumentAssembler for PdfAssembler {
    fn push_file(&mut self, file: &SourceFile) -> AssemblyEvent {
        let separator = self.settings.current().barcode_separator;
        if file.prefix == separator {
            self.separators.push(file.path.clone());
            if self.pages.is_empty() {
                debug!(path = %file.path.display(), "[ASSEMBLE] Separator page with no pending pages");
                return AssemblyEvent::Pending;
            }
            return self.finish();
        }

        let extension = file.extension.to_ascii_lowercase();
        match &self.extension {
            Some(expected) if *expected != extension => {
                let mut files = self.accumulated();
                files.push(file.path.clone());
                warn!(
                    path = %file.path.display(),
                    expected = %expected,
                    found = %extension,
                    "[ASSEMBLE] Mixed file types in one sequence"
                );
                AssemblyEvent::SequenceBroken {
                    files,
                    reason: BrokenReason::MixedExtensions {
                        expected: expected.clone(),
                        found: extension,
                    },
                }
            }
            _ => {
                self.extension.get_or_insert(extension);
                self.pages.push(file.path.clone());
                debug!(path = %file.path.display(), pages = self.pages.len(), "[ASSEMBLE] Page accumulated");
                AssemblyEvent::Pending
            }
        }
    }

    fn pending(&self) -> Vec<PathBuf> {
        self.accumulated()
    }

    fn reset(&mut self) {
        self.pages.clear();
        self.separators.clear();
        self.extension = None;
    }
}
