//! Scripted in-memory backend shared by the integration tests.
#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    io::{Read, Write},
    path::{Path, PathBuf},
};

use proberun_core::{
    Association, Backend, BackendError, BackendResult, ClusterAssignment, FaceBox,
    FrameAttributes, MediaClusterItem, Role, SearchHit, TemplateId, Track,
};

/// Media handle: the file name of the loaded path.
#[derive(Debug)]
pub struct Media {
    pub name: String,
}

/// Template handle: a scalar feature and the number of associations used.
#[derive(Debug)]
pub struct Template {
    pub value: f32,
    pub sources: usize,
}

#[derive(Debug, Default)]
pub struct Gallery {
    pub entries: Vec<(TemplateId, f32)>,
    pub prepared: bool,
}

/// Backend whose failures are configured per media name and whose handle
/// counts are observable.
#[derive(Default)]
pub struct Scripted {
    failing_loads: HashSet<String>,
    enroll_errors: HashMap<String, BackendError>,
    faceless: HashSet<String>,
    hits: Option<Vec<SearchHit>>,
    failing_search: bool,
    clustering: bool,
    live_media: Cell<i64>,
    live_templates: Cell<i64>,
    live_galleries: Cell<i64>,
    roles: RefCell<Vec<Role>>,
}

fn bump(counter: &Cell<i64>, delta: i64) {
    counter.set(counter.get() + delta);
}

fn feature(name: &str) -> f32 {
    let sum: u32 = name.bytes().map(u32::from).sum();
    (sum % 97) as f32 / 97.0
}

impl Scripted {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_load(mut self, name: &str) -> Self {
        self.failing_loads.insert(name.to_owned());
        self
    }

    pub fn enroll_error(mut self, name: &str, error: BackendError) -> Self {
        self.enroll_errors.insert(name.to_owned(), error);
        self
    }

    pub fn faceless(mut self, name: &str) -> Self {
        self.faceless.insert(name.to_owned());
        self
    }

    pub fn search_hits(mut self, hits: Vec<SearchHit>) -> Self {
        self.hits = Some(hits);
        self
    }

    pub fn failing_search(mut self) -> Self {
        self.failing_search = true;
        self
    }

    pub fn with_clustering(mut self) -> Self {
        self.clustering = true;
        self
    }

    /// Handles created but not yet released, as `(media, templates, galleries)`.
    pub fn live(&self) -> (i64, i64, i64) {
        (
            self.live_media.get(),
            self.live_templates.get(),
            self.live_galleries.get(),
        )
    }

    pub fn roles(&self) -> Vec<Role> {
        self.roles.borrow().clone()
    }
}

fn read_text(reader: &mut dyn Read) -> BackendResult<String> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|error| BackendError::Corrupt {
            reason: error.to_string(),
        })?;
    Ok(text)
}

fn corrupt(reason: &str) -> BackendError {
    BackendError::Corrupt {
        reason: reason.to_owned(),
    }
}

fn write_text(writer: &mut dyn Write, text: &str) -> BackendResult<()> {
    writer
        .write_all(text.as_bytes())
        .map_err(|error| BackendError::Failed {
            operation: "serialize",
            reason: error.to_string(),
        })
}

/// Serialized form understood by [`Scripted::deserialize_template`].
pub fn template_text(value: f32, sources: usize) -> String {
    format!("scripted {value} {sources}\n")
}

impl Backend for Scripted {
    type Media = Media;
    type Template = Template;
    type Gallery = Gallery;

    fn name(&self) -> &str {
        "scripted"
    }

    fn load_media(&self, path: &Path) -> BackendResult<Media> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.failing_loads.contains(&name) {
            return Err(BackendError::Failed {
                operation: "load_media",
                reason: format!("cannot decode {name}"),
            });
        }
        bump(&self.live_media, 1);
        Ok(Media { name })
    }

    fn free_media(&self, _media: Media) -> BackendResult<()> {
        bump(&self.live_media, -1);
        Ok(())
    }

    fn detect(&self, media: &Media, _min_face_size: u32) -> BackendResult<Vec<Track>> {
        if self.faceless.contains(&media.name) {
            return Ok(Vec::new());
        }
        let mut track = Track::from_frames(vec![FrameAttributes::with_face(FaceBox::new(
            1.0, 2.0, 30.0, 40.0,
        ))]);
        track.detection_confidence = 0.5;
        Ok(vec![track])
    }

    fn create_template(&self, associations: &[Association<'_, Media>], role: Role) -> BackendResult<Template> {
        self.roles.borrow_mut().push(role);
        if associations.is_empty() {
            return Err(BackendError::MissingAttributes);
        }
        for association in associations {
            if let Some(error) = self.enroll_errors.get(&association.media.name) {
                return Err(error.clone());
            }
        }
        let total: f32 = associations
            .iter()
            .map(|association| feature(&association.media.name))
            .sum();
        bump(&self.live_templates, 1);
        Ok(Template {
            value: total / associations.len() as f32,
            sources: associations.len(),
        })
    }

    fn serialize_template(&self, template: &Template, writer: &mut dyn Write) -> BackendResult<()> {
        write_text(writer, &template_text(template.value, template.sources))
    }

    fn deserialize_template(&self, reader: &mut dyn Read) -> BackendResult<Template> {
        let text = read_text(reader)?;
        let mut words = text.split_whitespace();
        let (Some("scripted"), Some(value), Some(sources)) = (words.next(), words.next(), words.next()) else {
            return Err(corrupt("not a scripted template"));
        };
        let value = value.parse().map_err(|_| corrupt("bad value"))?;
        let sources = sources.parse().map_err(|_| corrupt("bad sources"))?;
        bump(&self.live_templates, 1);
        Ok(Template { value, sources })
    }

    fn delete_template(&self, _template: Template) -> BackendResult<()> {
        bump(&self.live_templates, -1);
        Ok(())
    }

    fn verify(&self, reference: &Template, verification: &Template) -> BackendResult<f32> {
        Ok(1.0 - (reference.value - verification.value).abs())
    }

    fn create_gallery(&self, templates: &[&Template], ids: &[TemplateId]) -> BackendResult<Gallery> {
        bump(&self.live_galleries, 1);
        Ok(Gallery {
            entries: ids
                .iter()
                .zip(templates)
                .map(|(&id, template)| (id, template.value))
                .collect(),
            prepared: false,
        })
    }

    fn gallery_insert(&self, gallery: &mut Gallery, template: &Template, id: TemplateId) -> BackendResult<()> {
        gallery.entries.push((id, template.value));
        gallery.prepared = false;
        Ok(())
    }

    fn gallery_remove(&self, gallery: &mut Gallery, id: TemplateId) -> BackendResult<()> {
        let before = gallery.entries.len();
        gallery.entries.retain(|(entry, _)| *entry != id);
        if gallery.entries.len() == before {
            return Err(BackendError::UnknownId { id });
        }
        gallery.prepared = false;
        Ok(())
    }

    fn prepare_gallery(&self, gallery: &mut Gallery) -> BackendResult<()> {
        gallery.prepared = true;
        Ok(())
    }

    fn serialize_gallery(&self, gallery: &Gallery, writer: &mut dyn Write) -> BackendResult<()> {
        let mut text = format!("gallery {}\n", gallery.prepared);
        for (id, value) in &gallery.entries {
            text.push_str(&format!("{id} {value}\n"));
        }
        write_text(writer, &text)
    }

    fn deserialize_gallery(&self, reader: &mut dyn Read) -> BackendResult<Gallery> {
        let text = read_text(reader)?;
        let mut lines = text.lines();
        let prepared = match lines.next() {
            Some("gallery true") => true,
            Some("gallery false") => false,
            _ => return Err(corrupt("not a scripted gallery")),
        };
        let mut entries = Vec::new();
        for line in lines {
            let (id, value) = line.split_once(' ').ok_or_else(|| corrupt("bad entry"))?;
            entries.push((
                id.parse().map_err(|_| corrupt("bad id"))?,
                value.parse().map_err(|_| corrupt("bad value"))?,
            ));
        }
        bump(&self.live_galleries, 1);
        Ok(Gallery { entries, prepared })
    }

    fn delete_gallery(&self, _gallery: Gallery) -> BackendResult<()> {
        bump(&self.live_galleries, -1);
        Ok(())
    }

    fn search(&self, probe: &Template, gallery: &Gallery, num_requested: usize) -> BackendResult<Vec<SearchHit>> {
        if self.failing_search {
            return Err(BackendError::Failed {
                operation: "search",
                reason: "scripted failure".to_owned(),
            });
        }
        if let Some(hits) = &self.hits {
            return Ok(hits.iter().copied().take(num_requested).collect());
        }
        if !gallery.prepared {
            return Err(BackendError::Failed {
                operation: "search",
                reason: "gallery not prepared".to_owned(),
            });
        }
        let mut hits: Vec<SearchHit> = gallery
            .entries
            .iter()
            .map(|&(id, value)| SearchHit {
                id,
                similarity: 1.0 - (probe.value - value).abs(),
            })
            .collect();
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity).then(a.id.cmp(&b.id)));
        hits.truncate(num_requested);
        Ok(hits)
    }

    fn cluster_templates(
        &self,
        templates: &[&Template],
        ids: &[TemplateId],
        _hint: u64,
    ) -> BackendResult<Vec<ClusterAssignment>> {
        if !self.clustering {
            return Err(BackendError::NotImplemented {
                operation: "cluster_templates",
            });
        }
        Ok(ids
            .iter()
            .zip(templates)
            .enumerate()
            .map(|(index, (&source_id, _))| ClusterAssignment {
                source_id,
                cluster_id: (index % 2) as u64,
                confidence: 1.0,
            })
            .collect())
    }

    fn cluster_media(&self, media: &[&Media], ids: &[u64], _hint: u64) -> BackendResult<Vec<MediaClusterItem>> {
        if !self.clustering {
            return Err(BackendError::NotImplemented {
                operation: "cluster_media",
            });
        }
        Ok(ids
            .iter()
            .zip(media)
            .map(|(&source_id, _)| {
                let frames = (0..2)
                    .map(|frame| FrameAttributes {
                        frame_number: Some(frame),
                        ..FrameAttributes::with_face(FaceBox::new(0.0, 0.0, 10.0, 10.0))
                    })
                    .collect();
                MediaClusterItem {
                    assignment: ClusterAssignment {
                        source_id,
                        cluster_id: 0,
                        confidence: 0.75,
                    },
                    track: Track::from_frames(frames),
                }
            })
            .collect())
    }
}

/// Writes a scripted template file and returns its path.
pub fn write_template(dir: &Path, id: TemplateId, value: f32) -> PathBuf {
    let path = dir.join(format!("{id}.template"));
    std::fs::write(&path, template_text(value, 1)).expect("template must be written");
    path
}

/// Writes a manifest listing `(id, subject, path, filename)` rows.
pub fn write_manifest(dir: &Path, name: &str, rows: &[(TemplateId, i64, &Path, Option<&str>)]) -> PathBuf {
    let mut text = String::from("TEMPLATE_ID,SUBJECT_ID,TEMPLATE_PATH,FILENAME\n");
    for (id, subject, path, filename) in rows {
        text.push_str(&format!(
            "{id},{subject},{},{}\n",
            path.display(),
            filename.unwrap_or_default()
        ));
    }
    let path = dir.join(name);
    std::fs::write(&path, text).expect("manifest must be written");
    path
}

/// Reads a result file as lines, header included.
pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .expect("result file must exist")
        .lines()
        .map(ToOwned::to_owned)
        .collect()
}
