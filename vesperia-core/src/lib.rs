use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub mod buffer;
pub mod fps4;
pub mod layout;
pub mod patch;
pub mod patcher;
pub mod randomizer;
pub mod rng;
pub mod strings;
pub mod tables;
pub mod tool;

use buffer::Archive;
use patch::PatchDocument;
use tables::GameData;

#[derive(Debug, Error)]
pub enum VesperiaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed {record} at offset {offset:#x}: {reason}")]
    MalformedRecord {
        record: &'static str,
        offset: usize,
        reason: String,
    },
    #[error("patch references unknown {domain} key {key}")]
    UnknownPatchKey { domain: &'static str, key: String },
    #[error("invalid patch: {0}")]
    InvalidPatch(String),
    #[error("external tool `{program}` failed: {message}")]
    ExternalToolFailure { program: String, message: String },
    #[error("no candidates left for {0}")]
    InsufficientCandidates(String),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, VesperiaError>;

/// A game domain that can be randomized and patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Artes,
    Skills,
    Items,
    Shops,
    Chests,
    Search,
}

impl Target {
    pub const ALL: [Target; 6] = [
        Target::Artes,
        Target::Skills,
        Target::Items,
        Target::Shops,
        Target::Chests,
        Target::Search,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Target::Artes => "artes",
            Target::Skills => "skills",
            Target::Items => "items",
            Target::Shops => "shops",
            Target::Chests => "chests",
            Target::Search => "search",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Target {
    type Err = VesperiaError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.to_ascii_lowercase();
        Target::ALL
            .into_iter()
            .find(|target| target.name() == lowered)
            .ok_or_else(|| {
                VesperiaError::Config(format!(
                    "unknown target `{s}` (expected one of artes, skills, items, shops, chests, search)"
                ))
            })
    }
}

/// Expands an empty selection to every target, and puts the selection in
/// the fixed processing order.
pub fn resolve_targets(targets: &[Target]) -> Vec<Target> {
    if targets.is_empty() {
        return Target::ALL.to_vec();
    }
    let mut resolved = targets.to_vec();
    resolved.sort();
    resolved.dedup();
    resolved
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomizerSettings {
    pub seed: u64,
    pub player: String,
    #[serde(default)]
    pub targets: Vec<Target>,
    pub data_dir: PathBuf,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatcherSettings {
    pub patch_file: PathBuf,
    pub build_dir: PathBuf,
    /// Reference tables; only read when the patch touches shops.
    pub data_dir: PathBuf,
}

/// Where the extracted working copies live inside a build directory.
#[derive(Debug, Clone)]
pub struct BuildLayout {
    root: PathBuf,
}

impl BuildLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artes(&self) -> PathBuf {
        self.root.join("BTL_PACK").join("0004.ext").join("ALL.0000")
    }

    pub fn skills(&self) -> PathBuf {
        self.root.join("BTL_PACK").join("0010.ext").join("ALL.0000")
    }

    pub fn items(&self) -> PathBuf {
        self.root.join("item").join("ITEM.DAT")
    }

    pub fn item_sort(&self) -> PathBuf {
        self.root.join("item").join("ITEMSORT.DAT")
    }

    pub fn scenario(&self) -> PathBuf {
        self.root.join("scenario").join("0").join("0.dec")
    }

    pub fn maps(&self) -> PathBuf {
        self.root.join("maps")
    }

    pub fn chests(&self, area: &str) -> PathBuf {
        self.maps().join(area).join("0004.dec")
    }

    pub fn search_points(&self) -> PathBuf {
        self.maps().join("FIELD").join("0005.dec")
    }
}

fn require_file(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(VesperiaError::Config(format!(
            "Working copy does not exist: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Generates a patch document and writes it to `settings.output_path`.
///
/// When the output path is a directory the file is named after the patch
/// identifier. Returns the path that was written.
pub fn run(settings: RandomizerSettings) -> Result<PathBuf> {
    if !settings.data_dir.is_dir() {
        return Err(VesperiaError::Config(format!(
            "Data directory does not exist: {}",
            settings.data_dir.display()
        )));
    }

    let document = randomizer::randomize(&settings)?;

    let out_path = if settings.output_path.is_dir() {
        settings
            .output_path
            .join(format!("{}.tovdepatch", document.identifier()))
    } else {
        if let Some(parent) = settings.output_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        settings.output_path.clone()
    };

    document.save(&out_path)?;
    log::info!("Patch file: {}", out_path.display());
    Ok(out_path)
}

/// Applies every section present in the patch document to the working
/// copies under the build directory.
pub fn apply_patch(settings: &PatcherSettings) -> Result<()> {
    let document = PatchDocument::load(&settings.patch_file)?;
    let layout = BuildLayout::new(&settings.build_dir);

    log::info!(
        "Patch {} (player {}, created {}, seed {})",
        document.identifier(),
        document.player,
        document.created,
        document.seed
    );

    if let Some(artes) = &document.artes {
        log::info!("> Patching Artes...");
        let path = layout.artes();
        require_file(&path)?;
        let mut archive = Archive::open_mutable(&path)?;
        patcher::artes::patch_artes(&mut archive, artes)?;
        archive.flush()?;
    }

    if let Some(skills) = &document.skills {
        log::info!("> Patching Skills...");
        let path = layout.skills();
        require_file(&path)?;
        let mut archive = Archive::open_mutable(&path)?;
        patcher::skills::patch_skills(&mut archive, skills)?;
        archive.flush()?;
    }

    if let Some(items) = &document.items {
        log::info!("> Patching Items...");
        let path = layout.items();
        require_file(&path)?;
        let mut archive = Archive::open_mutable(&path)?;
        patcher::items::patch_items(&mut archive, items)?;
        archive.flush()?;
    }

    if let Some(shops) = &document.shops {
        log::info!("> Patching Shops...");
        let path = layout.scenario();
        require_file(&path)?;
        let shop_table = tables::load_shop_table(&settings.data_dir)?;
        let mut archive = Archive::open_mutable(&path)?;
        patcher::shops::patch_shops(&mut archive, shops, &shop_table.items)?;
        archive.flush()?;
    }

    if let Some(chests) = &document.chests {
        log::info!("> Patching Chests...");
        let on_disk = patcher::chests::discover_chest_maps(&layout.maps());
        for area in on_disk.keys().filter(|area| !chests.contains_key(*area)) {
            log::debug!("Chest map {area} has no changes");
        }

        for (area, area_chests) in chests {
            let path = layout.chests(area);
            if !path.is_file() {
                return Err(VesperiaError::UnknownPatchKey {
                    domain: "chest maps",
                    key: area.clone(),
                });
            }
            let mut archive = Archive::open_mutable(&path)?;
            patcher::chests::patch_chests(&mut archive, area_chests)?;
            archive.flush()?;
        }
    }

    if let Some(search) = &document.search {
        log::info!("> Patching Search Points...");
        let path = layout.search_points();
        require_file(&path)?;
        let mut archive = Archive::open_mutable(&path)?;
        patcher::search::patch_search_points(&mut archive, search)?;
        archive.flush()?;
    }

    log::info!("Patch finished");
    Ok(())
}

/// Loads the reference tables the given targets need.
pub fn load_game_data(data_dir: &Path, targets: &[Target]) -> Result<GameData> {
    GameData::load(data_dir, &resolve_targets(targets))
}
