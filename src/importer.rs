use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::Context;

use crate::partner::{
    AchievementDefinition, AchievementFile, AchievementSlot, AppList, IconKind,
    RemoteAchievement, Sdk, SteamApp,
};

/// Run switches for [`sync_apps`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Delete every remote achievement instead of reconciling.
    pub delete_all: bool,
    /// Leave achievements that already exist remotely untouched.
    pub skip_existing: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub images_uploaded: usize,
}

impl std::ops::AddAssign for SyncReport {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.deleted += other.deleted;
        self.images_uploaded += other.images_uploaded;
    }
}

pub async fn load_definitions(path: &Path) -> anyhow::Result<Vec<AchievementDefinition>> {
    let file = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read achievements file: {}", path.display()))?;

    let achievements = serde_json::from_str::<AchievementFile>(&file)
        .with_context(|| format!("Failed to parse achievements file: {}", path.display()))?;

    Ok(achievements.data)
}

pub async fn load_apps(path: &Path) -> anyhow::Result<Vec<SteamApp>> {
    let file = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read apps file: {}", path.display()))?;

    let apps = serde_json::from_str::<AppList>(&file)
        .with_context(|| format!("Failed to parse apps file: {}", path.display()))?;

    Ok(apps.steam_apps)
}

pub async fn load_cookie(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read cookie file: {}", path.display()))
}

/// First slot to offer the portal when creating achievements: one bit past
/// the highest slot in use, or `(0, 0)` for an empty app.
pub fn next_slot(existing: &[RemoteAchievement]) -> anyhow::Result<AchievementSlot> {
    slot_after(existing.iter().map(RemoteAchievement::slot).max())
}

fn slot_after(previous: Option<AchievementSlot>) -> anyhow::Result<AchievementSlot> {
    previous.map_or(Ok(AchievementSlot::new(0, 0)), AchievementSlot::next_bit)
}

/// Synchronizes every app in order. The first failing request aborts the run.
pub async fn sync_apps(
    sdk: &Sdk,
    apps: &[SteamApp],
    definitions: &[AchievementDefinition],
    image_dir: &Path,
    options: SyncOptions,
) -> anyhow::Result<SyncReport> {
    let mut total = SyncReport::default();

    for (index, app) in apps.iter().enumerate() {
        log::info!(
            "[App] [{}/{}] [SYNCING] {} ({})",
            index + 1,
            apps.len(),
            app.name,
            app.id
        );

        let report = sync_app(sdk, app, definitions, image_dir, options)
            .await
            .with_context(|| format!("Failed to sync app: {} ({})", app.name, app.id))?;

        log::info!(
            "[App] [{}/{}] [OK] {} ({}): {} created, {} updated, {} skipped, {} deleted, {} images",
            index + 1,
            apps.len(),
            app.name,
            app.id,
            report.created,
            report.updated,
            report.skipped,
            report.deleted,
            report.images_uploaded
        );

        total += report;
    }

    Ok(total)
}

async fn sync_app(
    sdk: &Sdk,
    app: &SteamApp,
    definitions: &[AchievementDefinition],
    image_dir: &Path,
    options: SyncOptions,
) -> anyhow::Result<SyncReport> {
    let remote = sdk
        .fetch_achievements(&app.id)
        .await
        .context("Failed to fetch achievements")?;

    if options.delete_all {
        return delete_achievements(sdk, &app.id, &remote).await;
    }

    let existing: HashMap<&str, &RemoteAchievement> = remote
        .iter()
        .map(|achievement| (achievement.api_name.as_str(), achievement))
        .collect();

    // Seeded from the remote maximum, then chained from each created slot.
    let mut previous = remote.iter().map(RemoteAchievement::slot).max();
    let mut report = SyncReport::default();

    for definition in definitions {
        let slot = if let Some(achievement) = existing.get(definition.id.as_str()) {
            if options.skip_existing {
                log::info!("[Achievement] [SKIP] {} ({})", definition.id, app.id);
                report.skipped += 1;
                continue;
            }

            log::info!("[Achievement] [UPDATE] {} ({})", definition.id, app.id);
            report.updated += 1;
            achievement.slot()
        } else {
            log::info!("[Achievement] [CREATE] {} ({})", definition.id, app.id);

            let hint = slot_after(previous)
                .with_context(|| format!("Failed to allocate slot for: {}", definition.id))?;
            let slot = sdk
                .new_achievement(&app.id, hint)
                .await
                .with_context(|| format!("Failed to create achievement: {}", definition.id))?;

            previous = Some(slot);
            report.created += 1;
            slot
        };

        sdk.save_achievement(&app.id, slot, definition)
            .await
            .with_context(|| format!("Failed to save achievement: {} [{slot}]", definition.id))?;

        report.images_uploaded += upload_icons(sdk, &app.id, slot, definition, image_dir).await?;
    }

    Ok(report)
}

async fn delete_achievements(
    sdk: &Sdk,
    app_id: &str,
    remote: &[RemoteAchievement],
) -> anyhow::Result<SyncReport> {
    for achievement in remote {
        log::info!("[Achievement] [DELETE] {} ({app_id})", achievement.api_name);

        sdk.delete_achievement(app_id, achievement.slot())
            .await
            .with_context(|| format!("Failed to delete achievement: {}", achievement.api_name))?;
    }

    Ok(SyncReport {
        deleted: remote.len(),
        ..SyncReport::default()
    })
}

async fn upload_icons(
    sdk: &Sdk,
    app_id: &str,
    slot: AchievementSlot,
    definition: &AchievementDefinition,
    image_dir: &Path,
) -> anyhow::Result<usize> {
    let icons: [(IconKind, PathBuf); 2] = [
        (IconKind::Unlocked, image_dir.join(&definition.icon)),
        (IconKind::Locked, image_dir.join(&definition.icon_locked)),
    ];

    for (kind, path) in &icons {
        if log::log_enabled!(log::Level::Debug) {
            let digest = crate::digest::file_digest(path).await?;
            log::debug!("[Image] [{kind:?}] {} sha256 {digest}", path.display());
        }

        sdk.upload_image(app_id, slot, *kind, path)
            .await
            .with_context(|| {
                format!("Failed to upload {kind:?} icon for achievement: {}", definition.id)
            })?;
    }

    Ok(icons.len())
}
