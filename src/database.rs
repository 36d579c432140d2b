use crate::constants::{ENTRIES_FILE, IMAGES_DIR, PROFILE_FILE};
use crate::models::{JournalEntry, ProfileStatistics, UserProfile};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Payload-free broadcast sent after every committed mutation.
/// Subscribers re-query whatever state they need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalChanged;

/// Entries grouped by local calendar day, each bucket ordered by capture time.
#[derive(Debug, Clone, Default)]
pub struct DayIndex {
    buckets: BTreeMap<NaiveDate, Vec<JournalEntry>>,
}

impl DayIndex {
    pub fn rebuild(entries: Vec<JournalEntry>) -> Self {
        let mut index = Self::default();
        for entry in entries {
            index.upsert(entry);
        }
        index
    }

    /// Inserts or replaces the entry with the same id.
    pub fn upsert(&mut self, entry: JournalEntry) {
        self.remove(entry.id);
        let bucket = self.buckets.entry(entry.calendar_day()).or_default();
        let pos = bucket.partition_point(|e| (e.captured_at, e.id) < (entry.captured_at, entry.id));
        bucket.insert(pos, entry);
    }

    pub fn remove(&mut self, id: Uuid) -> Option<JournalEntry> {
        let day = self.find(id)?.calendar_day();
        let bucket = self.buckets.get_mut(&day)?;
        let pos = bucket.iter().position(|e| e.id == id)?;
        let removed = bucket.remove(pos);
        if bucket.is_empty() {
            self.buckets.remove(&day);
        }
        Some(removed)
    }

    pub fn find(&self, id: Uuid) -> Option<&JournalEntry> {
        self.iter().find(|e| e.id == id)
    }

    fn find_mut(&mut self, id: Uuid) -> Option<&mut JournalEntry> {
        self.buckets.values_mut().flatten().find(|e| e.id == id)
    }

    pub fn bucket(&self, day: NaiveDate) -> Option<&[JournalEntry]> {
        self.buckets.get(&day).map(Vec::as_slice)
    }

    pub fn days(&self) -> impl Iterator<Item = (NaiveDate, usize)> + '_ {
        self.buckets.iter().map(|(day, bucket)| (*day, bucket.len()))
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &JournalEntry> {
        self.buckets.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Counts distinct ids, distinct countries (last segment of the place label, as
/// written) and favorites. Always computed from scratch.
pub fn compute_statistics<'a>(entries: impl IntoIterator<Item = &'a JournalEntry>) -> ProfileStatistics {
    let mut places = HashSet::new();
    let mut countries = HashSet::new();
    let mut favorites_count = 0;

    for entry in entries {
        places.insert(entry.id);
        if let Some(country) = entry.country() {
            countries.insert(country.to_string());
        }
        if entry.is_favorite {
            favorites_count += 1;
        }
    }

    ProfileStatistics {
        places_count: places.len(),
        countries_count: countries.len(),
        favorites_count,
    }
}

#[derive(Debug, Default)]
struct StoreState {
    days: DayIndex,
    // Records whose image could not be read at load time. Kept out of the index
    // but written back on every persist.
    unavailable: Vec<JournalEntry>,
    profile: UserProfile,
}

/// Durable journal: entry metadata in one JSON array, one image file per entry,
/// and a single profile record. Every mutation rewrites the metadata file wholesale.
///
/// Clones share the same state. Mutations are serialized by the write lock and are
/// committed in memory only after the disk write succeeded.
#[derive(Clone)]
pub struct EntryStore {
    state: Arc<RwLock<StoreState>>,
    data_dir: PathBuf,
    events: broadcast::Sender<JournalChanged>,
}

impl EntryStore {
    /// Creates the storage directories and loads whatever is already there.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let images_dir = data_dir.join(IMAGES_DIR);
        fs::create_dir_all(&images_dir)
            .with_context(|| format!("Failed to create {}", images_dir.display()))?;

        let (events, _) = broadcast::channel(64);
        let store = Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            data_dir: data_dir.to_path_buf(),
            events,
        };
        store.load()?;
        Ok(store)
    }

    pub fn image_path(&self, entry: &JournalEntry) -> PathBuf {
        self.data_dir.join(IMAGES_DIR).join(&entry.image_name)
    }

    fn entries_path(&self) -> PathBuf {
        self.data_dir.join(ENTRIES_FILE)
    }

    fn profile_path(&self) -> PathBuf {
        self.data_dir.join(PROFILE_FILE)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JournalChanged> {
        self.events.subscribe()
    }

    fn notify(&self) {
        // No subscribers is fine
        let _ = self.events.send(JournalChanged);
    }

    /// Rebuilds the in-memory index from disk. Entries whose image file is missing
    /// or unreadable are left out of the index but stay in the metadata file.
    /// Returns the number of entries loaded.
    pub fn load(&self) -> Result<usize> {
        let records = read_entries_file(&self.entries_path())?;

        let (available, unavailable): (Vec<JournalEntry>, Vec<JournalEntry>) =
            records.into_iter().partition(|entry| {
                let readable = fs::File::open(self.image_path(entry))
                    .and_then(|f| f.metadata())
                    .map(|m| m.is_file())
                    .unwrap_or(false);
                if !readable {
                    warn!(id = %entry.id, image = %entry.image_name, "Image file missing, skipping entry");
                }
                readable
            });

        let profile = read_profile_file(&self.profile_path())?;
        let loaded = available.len();

        let mut state = self.write_state();
        state.days = DayIndex::rebuild(available);
        state.unavailable = unavailable;
        state.profile = profile;
        info!(loaded, skipped = state.unavailable.len(), "Journal loaded");
        Ok(loaded)
    }

    /// Upserts an entry by id together with its image bytes.
    pub fn save(&self, entry: JournalEntry, image: &[u8]) -> Result<()> {
        let mut state = self.write_state();

        let id = entry.id;
        let is_new = state.days.find(id).is_none();
        let image_path = self.image_path(&entry);
        write_atomic(&image_path, image)
            .with_context(|| format!("Failed to write image {}", image_path.display()))?;

        let mut next = state.days.clone();
        next.upsert(entry);
        let unavailable: Vec<JournalEntry> =
            state.unavailable.iter().filter(|e| e.id != id).cloned().collect();
        if let Err(e) = self.persist_entries(&next, &unavailable) {
            if is_new {
                if let Err(remove_err) = fs::remove_file(&image_path) {
                    warn!(path = %image_path.display(), error = %remove_err, "Failed to remove unsaved image");
                }
            }
            return Err(e);
        }
        state.days = next;
        state.unavailable = unavailable;
        drop(state);

        debug!(%id, "Entry saved");
        self.notify();
        Ok(())
    }

    /// Removes an entry and its image file. Returns `false` when no such entry exists.
    pub fn delete(&self, id: Uuid) -> Result<bool> {
        let mut state = self.write_state();

        let mut next = state.days.clone();
        let Some(removed) = next.remove(id) else {
            return Ok(false);
        };
        self.persist_entries(&next, &state.unavailable)?;
        state.days = next;
        drop(state);

        let image_path = self.image_path(&removed);
        match fs::remove_file(&image_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %image_path.display(), error = %e, "Failed to remove image file"),
        }

        debug!(%id, "Entry deleted");
        self.notify();
        Ok(true)
    }

    /// Flips the favorite flag. Unknown ids (e.g. deleted concurrently) are a no-op
    /// and return `None`; otherwise the new flag value is returned.
    pub fn toggle_favorite(&self, id: Uuid) -> Result<Option<bool>> {
        let mut state = self.write_state();

        let mut next = state.days.clone();
        let Some(entry) = next.find_mut(id) else {
            debug!(%id, "Favorite toggle for unknown entry ignored");
            return Ok(None);
        };
        entry.is_favorite = !entry.is_favorite;
        let is_favorite = entry.is_favorite;

        self.persist_entries(&next, &state.unavailable)?;
        state.days = next;
        drop(state);

        self.notify();
        Ok(Some(is_favorite))
    }

    pub fn update_profile(&self, profile: UserProfile) -> Result<()> {
        let mut state = self.write_state();
        let json = serde_json::to_vec_pretty(&profile)?;
        write_atomic(&self.profile_path(), &json).context("Failed to write profile")?;
        state.profile = profile;
        drop(state);

        self.notify();
        Ok(())
    }

    pub fn profile(&self) -> UserProfile {
        self.read_state().profile.clone()
    }

    pub fn get(&self, id: Uuid) -> Option<JournalEntry> {
        self.read_state().days.find(id).cloned()
    }

    /// All entries, newest first.
    pub fn all_entries(&self) -> Vec<JournalEntry> {
        let mut entries: Vec<JournalEntry> = self.read_state().days.iter().cloned().collect();
        entries.reverse();
        entries
    }

    pub fn entries_for_day(&self, day: NaiveDate) -> Option<Vec<JournalEntry>> {
        self.read_state().days.bucket(day).map(<[JournalEntry]>::to_vec)
    }

    /// Days that have entries, with their entry counts, oldest first.
    pub fn day_summaries(&self) -> Vec<(NaiveDate, usize)> {
        self.read_state().days.days().collect()
    }

    /// Whether an entry was already created from this asset, including entries
    /// whose image is currently unavailable.
    pub fn contains_source(&self, source_id: &str) -> bool {
        let state = self.read_state();
        let found = state
            .days
            .iter()
            .chain(&state.unavailable)
            .any(|e| e.source_id.as_deref() == Some(source_id));
        found
    }

    pub fn len(&self) -> usize {
        self.read_state().days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_state().days.is_empty()
    }

    pub fn statistics(&self) -> ProfileStatistics {
        compute_statistics(self.read_state().days.iter())
    }

    /// Reads the stored image of an entry.
    pub fn image_bytes(&self, entry: &JournalEntry) -> Result<Vec<u8>> {
        let path = self.image_path(entry);
        fs::read(&path).with_context(|| format!("Failed to read image {}", path.display()))
    }

    fn persist_entries(&self, days: &DayIndex, unavailable: &[JournalEntry]) -> Result<()> {
        let records: Vec<&JournalEntry> = days.iter().chain(unavailable).collect();
        let json = serde_json::to_vec_pretty(&records)?;
        write_atomic(&self.entries_path(), &json).context("Failed to write journal entries")
    }
}

fn read_entries_file(path: &Path) -> Result<Vec<JournalEntry>> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("Journal file {} is corrupted", path.display())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn read_profile_file(path: &Path) -> Result<UserProfile> {
    match fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(profile) => Ok(profile),
            Err(e) => {
                warn!(error = %e, "Profile record unreadable, using defaults");
                Ok(UserProfile::default())
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(UserProfile::default()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Writes to a sibling temp file, then renames over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}
