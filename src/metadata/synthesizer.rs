use std::path::Path;

use log::{debug, info, warn};

use crate::{
    error::Result,
    metadata::{
        stem_block::{StemBlockStore, StemManifest},
        tags::{CoverFormat, TagSet, TagStore},
    },
    types::StemOverrides,
};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SynthesisReport {
    pub warnings: Vec<String>,
    pub tags_copied: usize,
    pub cover: Option<CoverFormat>,
    pub manifest: Option<StemManifest>,
}

/// Decorates a freshly written container with tags, artwork and the stem block.
pub struct MetadataSynthesizer<'a> {
    tags: &'a dyn TagStore,
    stem_block: &'a dyn StemBlockStore,
}

impl<'a> MetadataSynthesizer<'a> {
    pub fn new(tags: &'a dyn TagStore, stem_block: &'a dyn StemBlockStore) -> Self {
        Self { tags, stem_block }
    }

    /// Copies tags and artwork from `source` (when given and readable), then writes
    /// the stem block. An unreadable source only produces a warning.
    pub fn synthesize(
        &self,
        dest: &Path,
        source: Option<&Path>,
        overrides: &StemOverrides,
    ) -> Result<SynthesisReport> {
        let mut report = SynthesisReport::default();

        if let Some(source) = source {
            self.copy_tags(dest, source, &mut report)?;
        }

        let manifest = StemManifest::resolve(overrides);
        self.stem_block.write(dest, &manifest)?;
        debug!(
            "stem block written to {}: {}",
            dest.display(),
            manifest
                .stems
                .iter()
                .map(|s| format!("{} {}", s.name, s.color))
                .collect::<Vec<_>>()
                .join(", ")
        );
        report.manifest = Some(manifest);

        Ok(report)
    }

    fn copy_tags(&self, dest: &Path, source: &Path, report: &mut SynthesisReport) -> Result<()> {
        let source_tags = match self.tags.read_source(source) {
            Ok(t) => t,
            Err(e) => {
                let msg = format!(
                    "could not read tags from {}, skipping tags and cover: {e}",
                    source.display()
                );
                warn!("{msg}");
                report.warnings.push(msg);
                return Ok(());
            }
        };

        let cover = source_tags.covers.first();
        if source_tags.tags.is_empty() && cover.is_none() {
            debug!("{} has no tags or artwork to copy", source.display());
            return Ok(());
        }

        let fields: TagSet = source_tags.tags;
        self.tags.write(dest, &fields, cover.as_ref())?;

        report.tags_copied = fields.len();
        report.cover = cover.as_ref().map(|c| c.format);
        info!(
            "copied {} tag(s){} from {}",
            fields.len(),
            if cover.is_some() { " and cover art" } else { "" },
            source.display()
        );
        Ok(())
    }
}
