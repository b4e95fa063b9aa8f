use std::{collections::BTreeMap, fmt, path::Path};

use id3::TagLike;
use lofty::{
    config::{ParseOptions, WriteOptions},
    file::{AudioFile, FileType, TaggedFileExt},
    picture::{MimeType, Picture, PictureType},
    probe::Probe,
    tag::{ItemKey, Tag, TagType},
};
use log::debug;

use crate::error::{Result, StemError};

/// Descriptive fields copied from a source file. Nothing else is touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TagField {
    Title,
    Artist,
    Album,
    Comment,
    Genre,
    Year,
    Track,
}

impl TagField {
    pub const ALL: [TagField; 7] = [
        TagField::Title,
        TagField::Artist,
        TagField::Album,
        TagField::Comment,
        TagField::Genre,
        TagField::Year,
        TagField::Track,
    ];

    fn item_key(self) -> ItemKey {
        match self {
            TagField::Title => ItemKey::TrackTitle,
            TagField::Artist => ItemKey::TrackArtist,
            TagField::Album => ItemKey::AlbumTitle,
            TagField::Comment => ItemKey::Comment,
            TagField::Genre => ItemKey::Genre,
            TagField::Year => ItemKey::Year,
            TagField::Track => ItemKey::TrackNumber,
        }
    }

    /// Key used when writing into an MP4 `ilst`, which only stores a full date (`©day`).
    fn mp4_item_key(self) -> ItemKey {
        match self {
            TagField::Year => ItemKey::RecordingDate,
            other => other.item_key(),
        }
    }
}

impl fmt::Display for TagField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TagField::Title => "title",
            TagField::Artist => "artist",
            TagField::Album => "album",
            TagField::Comment => "comment",
            TagField::Genre => "genre",
            TagField::Year => "year",
            TagField::Track => "track",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagSet {
    fields: BTreeMap<TagField, String>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: TagField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    /// Empty values are dropped.
    pub fn set(&mut self, field: TagField, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            self.fields.remove(&field);
        } else {
            self.fields.insert(field, value);
        }
    }

    pub fn with(mut self, field: TagField, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (TagField, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoverFormat {
    Jpeg,
    Png,
    Bmp,
    Gif,
    Unknown,
}

impl CoverFormat {
    pub fn from_mime(mime: Option<&str>) -> Self {
        match mime.map(|m| m.trim().to_ascii_lowercase()).as_deref() {
            Some("image/jpeg") | Some("image/jpg") => CoverFormat::Jpeg,
            Some("image/png") => CoverFormat::Png,
            Some("image/bmp") | Some("image/x-ms-bmp") => CoverFormat::Bmp,
            Some("image/gif") => CoverFormat::Gif,
            _ => CoverFormat::Unknown,
        }
    }

    fn mime_type(self) -> Option<MimeType> {
        match self {
            CoverFormat::Jpeg => Some(MimeType::Jpeg),
            CoverFormat::Png => Some(MimeType::Png),
            CoverFormat::Bmp => Some(MimeType::Bmp),
            CoverFormat::Gif => Some(MimeType::Gif),
            CoverFormat::Unknown => None,
        }
    }
}

/// Image as found in a source, before its MIME type is interpreted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawCover {
    pub data: Vec<u8>,
    pub mime: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cover {
    pub data: Vec<u8>,
    pub format: CoverFormat,
}

impl From<&RawCover> for Cover {
    fn from(raw: &RawCover) -> Self {
        Cover {
            data: raw.data.clone(),
            format: CoverFormat::from_mime(raw.mime.as_deref()),
        }
    }
}

/// The three places a source may keep its artwork, in lookup order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoverSource {
    /// Dedicated cover list (MP4 `covr`).
    pub covers: Vec<RawCover>,
    /// Generic picture list (FLAC/Vorbis/APE pictures).
    pub pictures: Vec<RawCover>,
    /// Embedded ID3v2 picture frames.
    pub id3_frames: Vec<RawCover>,
}

impl CoverSource {
    /// First image of the first non-empty representation.
    pub fn first(&self) -> Option<Cover> {
        [&self.covers, &self.pictures, &self.id3_frames]
            .into_iter()
            .find(|list| !list.is_empty())
            .and_then(|list| list.first())
            .map(Cover::from)
    }

    pub fn is_empty(&self) -> bool {
        self.covers.is_empty() && self.pictures.is_empty() && self.id3_frames.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceTags {
    pub tags: TagSet,
    pub covers: CoverSource,
}

/// Tag access keyed by path.
pub trait TagStore {
    fn read_source(&self, path: &Path) -> Result<SourceTags>;

    /// Sets the given fields on `dest`, plus the front cover when one is supplied,
    /// and saves once.
    fn write(&self, dest: &Path, tags: &TagSet, cover: Option<&Cover>) -> Result<()>;
}

/// lofty for everything it can parse, the id3 crate for raw ID3v2 frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoftyTagStore;

fn tagset_from_lofty(tag: &Tag) -> TagSet {
    let mut set = TagSet::new();
    for field in TagField::ALL {
        if let Some(v) = tag.get_string(&field.item_key()) {
            set.set(field, v.trim());
        }
    }
    if set.get(TagField::Year).is_none() {
        if let Some(date) = tag.get_string(&ItemKey::RecordingDate) {
            set.set(TagField::Year, date.chars().take(4).collect::<String>());
        }
    }
    set
}

fn tagset_from_id3(tag: &id3::Tag) -> TagSet {
    let mut set = TagSet::new();
    if let Some(v) = tag.title() {
        set.set(TagField::Title, v);
    }
    if let Some(v) = tag.artist() {
        set.set(TagField::Artist, v);
    }
    if let Some(v) = tag.album() {
        set.set(TagField::Album, v);
    }
    if let Some(c) = tag.comments().next() {
        set.set(TagField::Comment, c.text.as_str());
    }
    if let Some(v) = tag.genre_parsed() {
        set.set(TagField::Genre, v.into_owned());
    }
    if let Some(y) = tag.year() {
        set.set(TagField::Year, y.to_string());
    }
    if let Some(t) = tag.track() {
        set.set(TagField::Track, t.to_string());
    }
    set
}

fn raw_from_picture(p: &Picture) -> RawCover {
    RawCover {
        data: p.data().to_vec(),
        mime: p.mime_type().map(|m| m.as_str().to_string()),
    }
}

/// Tags only; audio properties are never needed here.
fn probe_tags(path: &Path) -> lofty::error::Result<lofty::file::TaggedFile> {
    Probe::open(path)?
        .options(ParseOptions::new().read_properties(false))
        .read()
}

fn read_id3(path: &Path) -> Option<id3::Tag> {
    // Detects RIFF/WAV chunks as well as a leading ID3v2 header.
    match id3::Tag::read_from_path(path) {
        Ok(tag) => Some(tag),
        Err(e) => {
            debug!("no ID3v2 tag in {}: {e}", path.display());
            None
        }
    }
}

impl TagStore for LoftyTagStore {
    fn read_source(&self, path: &Path) -> Result<SourceTags> {
        let id3_tag = read_id3(path);
        let mut source = SourceTags::default();
        if let Some(tag) = &id3_tag {
            source.covers.id3_frames = tag
                .pictures()
                .map(|p| RawCover {
                    data: p.data.clone(),
                    mime: Some(p.mime_type.clone()).filter(|m| !m.is_empty()),
                })
                .collect();
        }

        let probed = probe_tags(path);
        let tagged = match (probed, &id3_tag) {
            (Ok(tagged), _) => tagged,
            (Err(e), Some(tag)) => {
                debug!(
                    "lofty could not parse {} ({e}), using its ID3v2 tag",
                    path.display()
                );
                source.tags = tagset_from_id3(tag);
                return Ok(source);
            }
            (Err(e), None) => {
                return Err(StemError::Tag(format!(
                    "could not read tags from {}: {e}",
                    path.display()
                )))
            }
        };

        if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
            source.tags = tagset_from_lofty(tag);
        }

        for tag in tagged.tags() {
            match tag.tag_type() {
                // Read through the id3 crate above.
                TagType::Id3v2 => {}
                TagType::Mp4Ilst => source
                    .covers
                    .covers
                    .extend(tag.pictures().iter().map(raw_from_picture)),
                _ => source
                    .covers
                    .pictures
                    .extend(tag.pictures().iter().map(raw_from_picture)),
            }
        }

        debug!(
            "read {} field(s) from {}, artwork: {} cover(s), {} picture(s), {} id3 frame(s)",
            source.tags.len(),
            path.display(),
            source.covers.covers.len(),
            source.covers.pictures.len(),
            source.covers.id3_frames.len()
        );
        Ok(source)
    }

    fn write(&self, dest: &Path, tags: &TagSet, cover: Option<&Cover>) -> Result<()> {
        let mut tagged = probe_tags(dest)?;
        if tagged.file_type() != FileType::Mp4 {
            return Err(StemError::Tag(format!(
                "{} is not an MP4 container",
                dest.display()
            )));
        }

        if tagged.tag(TagType::Mp4Ilst).is_none() {
            tagged.insert_tag(Tag::new(TagType::Mp4Ilst));
        }
        let tag = tagged
            .tag_mut(TagType::Mp4Ilst)
            .ok_or_else(|| StemError::Tag("could not create an MP4 tag".into()))?;

        for (field, value) in tags.iter() {
            let key = field.mp4_item_key();
            tag.remove_key(&key);
            if !tag.insert_text(key, value.to_string()) {
                return Err(StemError::Tag(format!(
                    "{field} cannot be stored in the MP4 tag of {}",
                    dest.display()
                )));
            }
        }

        if let Some(cover) = cover {
            tag.remove_picture_type(PictureType::CoverFront);
            tag.push_picture(Picture::new_unchecked(
                PictureType::CoverFront,
                cover.format.mime_type(),
                None,
                cover.data.clone(),
            ));
        }

        tagged.save_to_path(dest, WriteOptions::default())?;
        debug!("saved {} tag field(s) to {}", tags.len(), dest.display());
        Ok(())
    }
}
