//! Job orchestration module.
//!
//! This module provides the main job lifecycle functions:
//! - Creating a job from a transfer request (validation)
//! - Planning a job (pre-scanning directory sources)
//! - Running a job (executing the transfer)
//!
//! A job moves through `Validating → PreScanning → Transferring → Finalizing`
//! and ends in exactly one of `Completed`, `Cancelled` or `Failed`.

use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::checksums;
use crate::conflict::{
    AlwaysCreate, Conflict, ConflictKind, ConflictResolver, DestinationPrompt, Resolution,
};
use crate::device::{DevicePolicy, FsDevicePolicy};
use crate::error::EngineError;
use crate::fs_ops;
use crate::model::{
    EngineOptions, EntryAction, EntryWarning, FileState, JobState, Mode, TransferCounts,
    TransferJob, TransferOutcome, TransferReport, TransferRequest, TransferStatistics,
};
use crate::progress::{EntryEvent, ProgressCallback};
use crate::stats::{self, ScanSettings};
use crate::temp_path::TempPathGenerator;
use crate::walker::{DirectoryWalker, EntryFilter, WalkOptions};

/// Everything the engine asks the caller while a job runs.
pub struct Collaborators<'a> {
    pub resolver: &'a dyn ConflictResolver,
    pub progress: Option<&'a dyn ProgressCallback>,
    pub create_destination: &'a dyn DestinationPrompt,
    pub devices: &'a dyn DevicePolicy,
}

impl<'a> Collaborators<'a> {
    /// Missing destinations are created and device identity comes from the
    /// filesystem.
    pub fn new(resolver: &'a dyn ConflictResolver) -> Self {
        Collaborators {
            resolver,
            progress: None,
            create_destination: &AlwaysCreate,
            devices: &FsDevicePolicy,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_destination_prompt(mut self, prompt: &'a dyn DestinationPrompt) -> Self {
        self.create_destination = prompt;
        self
    }

    pub fn with_devices(mut self, devices: &'a dyn DevicePolicy) -> Self {
        self.devices = devices;
        self
    }
}

/// Create a new transfer job.
///
/// Validates the request without touching the filesystem: every source must
/// exist, no source may resolve to its own destination, and the destination
/// may not lie inside a directory source. The destination itself may not
/// exist yet (it is created, after asking, when the job runs).
///
/// # Returns
/// A new TransferJob in `Validating` state, with canonical source paths
///
/// # Errors
/// Returns a validation error, or `ZeroBufferSize` for an unusable buffer
pub fn create_job(
    request: TransferRequest,
    options: EngineOptions,
) -> Result<TransferJob, EngineError> {
    if options.buffer_size == 0 {
        return Err(EngineError::ZeroBufferSize);
    }
    if request.sources.is_empty() {
        return Err(EngineError::NoSources);
    }

    let destination = resolve_lenient(&request.destination);
    if let Ok(metadata) = fs::metadata(&destination) {
        if !metadata.is_dir() {
            return Err(EngineError::DestinationNotDirectory {
                path: request.destination,
            });
        }
    }

    let mut sources = Vec::with_capacity(request.sources.len());
    for source in &request.sources {
        let metadata = fs::symlink_metadata(source).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                EngineError::SourceNotFound {
                    path: source.clone(),
                }
            } else {
                EngineError::ReadError {
                    path: source.clone(),
                    source: e,
                }
            }
        })?;
        let canonical = canonical_entry(source)?;

        let lands_on_itself = canonical
            .file_name()
            .is_some_and(|name| destination.join(name) == canonical);
        if destination == canonical || lands_on_itself {
            return Err(EngineError::SameSourceAndDestination {
                path: source.clone(),
            });
        }
        if metadata.is_dir() && destination.starts_with(&canonical) {
            return Err(EngineError::DestinationInsideSource {
                source_dir: source.clone(),
                destination: request.destination,
            });
        }
        if metadata.is_symlink() && treat_as_directory(source, &metadata, &options) {
            // A followed link is walked through its target.
            let target = fs::canonicalize(source).map_err(|e| EngineError::ReadError {
                path: source.clone(),
                source: e,
            })?;
            if destination == target {
                return Err(EngineError::SameSourceAndDestination {
                    path: source.clone(),
                });
            }
            if destination.starts_with(&target) {
                return Err(EngineError::DestinationInsideSource {
                    source_dir: source.clone(),
                    destination: request.destination,
                });
            }
        }
        sources.push(canonical);
    }

    let id = Uuid::new_v4();
    info!(
        "job {}: {} {} source(s) into {}",
        id,
        request.mode,
        sources.len(),
        destination.display()
    );

    Ok(TransferJob {
        id,
        mode: request.mode,
        sources,
        destination_path: destination,
        options,
        state: JobState::Validating,
        statistics: TransferStatistics::default(),
        source_totals: Vec::new(),
        planned: false,
        bytes_transferred: 0,
        entries_done: 0,
        counts: TransferCounts::default(),
        warnings: Vec::new(),
        temp_paths: TempPathGenerator::new(),
        created_at: SystemTime::now(),
        start_time: None,
        end_time: None,
    })
}

/// Plan a job by counting its sources.
///
/// Directory sources are pre-scanned (the job enters `PreScanning`); file
/// sources count as one file each. `progress.on_yield` is called every
/// `yield_every` scanned entries. Planning twice is a no-op.
///
/// # Errors
/// `Cancelled` if the token trips during the scan, or the scan's I/O error
pub fn plan_job(
    job: &mut TransferJob,
    token: &CancellationToken,
    progress: Option<&dyn ProgressCallback>,
) -> Result<(), EngineError> {
    if job.planned {
        return Ok(());
    }

    let settings = ScanSettings {
        yield_every: job.options.yield_every,
        include_hidden: job.options.include_hidden,
    };
    let mut on_yield = || {
        if let Some(progress) = progress {
            progress.on_yield();
        }
    };

    let mut totals = TransferStatistics::default();
    let mut per_source = Vec::with_capacity(job.sources.len());
    for source in &job.sources {
        let metadata = fs::symlink_metadata(source).map_err(|e| EngineError::ReadError {
            path: source.clone(),
            source: e,
        })?;
        let source_totals = if treat_as_directory(source, &metadata, &job.options) {
            if job.state != JobState::PreScanning {
                job.state = JobState::PreScanning;
                info!("job {}: pre-scanning", job.id);
            }
            stats::collect_statistics(source, token, settings, &mut on_yield)?
        } else {
            TransferStatistics {
                total_files: 1,
                total_dirs: 0,
                total_bytes: if metadata.is_file() { metadata.len() } else { 0 },
            }
        };
        totals.merge(&source_totals);
        per_source.push(source_totals);
    }

    job.statistics = totals;
    job.source_totals = per_source;
    job.planned = true;
    debug!(
        "job {}: {} files, {} dirs, {} bytes",
        job.id, totals.total_files, totals.total_dirs, totals.total_bytes
    );
    Ok(())
}

/// Run a job, executing the transfer operation.
///
/// Plans the job first if needed. Per-entry errors and conflicts never stop
/// the job: they are collected as warnings in the report. The job ends
/// `Failed` only when the pre-scan fails or the destination root cannot be
/// created, and `Cancelled` when the token trips, the resolver answers
/// `Cancel`, or the caller declines to create the destination.
///
/// Completed entries are never rolled back.
pub fn run_job(
    job: &mut TransferJob,
    collaborators: &Collaborators<'_>,
    token: &CancellationToken,
) -> TransferReport {
    let outcome = execute(job, collaborators, token);

    job.state = match outcome {
        TransferOutcome::Completed { .. } => JobState::Completed,
        TransferOutcome::Cancelled { .. } => JobState::Cancelled,
        TransferOutcome::Failed { .. } => JobState::Failed,
    };
    job.end_time = Some(SystemTime::now());
    match &outcome {
        TransferOutcome::Failed { reason, .. } => warn!("job {} failed: {}", job.id, reason),
        _ => info!(
            "job {}: {:?} after {} bytes, {} warning(s)",
            job.id,
            job.state,
            job.bytes_transferred,
            job.warnings.len()
        ),
    }

    if let Some(progress) = collaborators.progress {
        progress.on_job_completed(job, &outcome);
    }

    TransferReport {
        job_id: job.id,
        outcome,
        warnings: std::mem::take(&mut job.warnings),
        counts: job.counts,
        statistics: job.statistics,
    }
}

/// Validate, plan and run a request in one call.
///
/// A rejected request yields a `Failed` report without touching the
/// filesystem.
pub fn transfer(
    request: TransferRequest,
    options: EngineOptions,
    collaborators: &Collaborators<'_>,
    token: &CancellationToken,
) -> TransferReport {
    match create_job(request, options) {
        Ok(mut job) => run_job(&mut job, collaborators, token),
        Err(reason) => {
            warn!("transfer rejected: {}", reason);
            TransferReport {
                job_id: Uuid::new_v4(),
                outcome: TransferOutcome::failed(reason),
                warnings: Vec::new(),
                counts: TransferCounts::default(),
                statistics: TransferStatistics::default(),
            }
        }
    }
}

fn execute(
    job: &mut TransferJob,
    collaborators: &Collaborators<'_>,
    token: &CancellationToken,
) -> TransferOutcome {
    if !job.planned {
        match plan_job(job, token, collaborators.progress) {
            Ok(()) => {}
            Err(EngineError::Cancelled) => {
                return TransferOutcome::Cancelled {
                    bytes_transferred: 0,
                }
            }
            Err(e) => return TransferOutcome::failed(e),
        }
    }
    if token.is_cancelled() {
        return TransferOutcome::Cancelled {
            bytes_transferred: 0,
        };
    }

    match fs::metadata(&job.destination_path) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            return TransferOutcome::failed(EngineError::DestinationNotDirectory {
                path: job.destination_path.clone(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if !collaborators
                .create_destination
                .confirm_create(&job.destination_path)
            {
                info!(
                    "job {}: destination {} not created, cancelling",
                    job.id,
                    job.destination_path.display()
                );
                return TransferOutcome::Cancelled {
                    bytes_transferred: 0,
                };
            }
            if let Err(e) = fs_ops::create_dir(&job.destination_path) {
                return TransferOutcome::failed(e);
            }
        }
        Err(e) => {
            return TransferOutcome::failed(EngineError::ReadError {
                path: job.destination_path.clone(),
                source: e,
            })
        }
    }

    job.state = JobState::Transferring;
    job.start_time = Some(SystemTime::now());
    info!("job {}: transferring", job.id);
    if let Some(progress) = collaborators.progress {
        progress.on_job_started(job);
    }

    let sources = job.sources.clone();
    let mut run = Transfer {
        job,
        collaborators,
        token,
        stopped: false,
        moved_dirs: Vec::new(),
        unreported_rename: None,
    };
    for (index, source) in sources.iter().enumerate() {
        if run.should_stop() {
            break;
        }
        run.transfer_source(index, source);
    }
    if let Some(last) = run.unreported_rename.take() {
        run.report_entries(&last);
    }

    if run.should_stop() {
        return TransferOutcome::Cancelled {
            bytes_transferred: run.job.bytes_transferred,
        };
    }

    run.job.state = JobState::Finalizing;
    info!("job {}: finalizing", run.job.id);
    run.remove_emptied_sources();

    TransferOutcome::Completed {
        bytes_transferred: run.job.bytes_transferred,
    }
}

/// One running job and its collaborators.
struct Transfer<'r, 'c> {
    job: &'r mut TransferJob,
    collaborators: &'r Collaborators<'c>,
    token: &'r CancellationToken,
    /// Set when the resolver answered `Cancel`
    stopped: bool,
    /// Directory sources whose entries were moved away
    moved_dirs: Vec<PathBuf>,
    /// Last renamed entry not yet covered by a progress report
    unreported_rename: Option<PathBuf>,
}

impl Transfer<'_, '_> {
    fn should_stop(&self) -> bool {
        self.stopped || self.token.is_cancelled()
    }

    fn transfer_source(&mut self, index: usize, source: &Path) {
        let metadata = match fs::symlink_metadata(source) {
            Ok(metadata) => metadata,
            Err(e) => {
                let error = EngineError::ReadError {
                    path: source.to_path_buf(),
                    source: e,
                };
                self.fail_entry(source, source, error);
                return;
            }
        };
        // Canonical sources always carry a file name; the root is rejected
        // as a destination ancestor.
        let Some(name) = source.file_name() else {
            return;
        };
        let target = self.job.destination_path.join(name);

        if treat_as_directory(source, &metadata, &self.job.options) {
            self.transfer_directory(index, source, &target);
        } else {
            self.transfer_file(source, &target, &metadata);
            self.yield_point();
        }
    }

    fn transfer_directory(&mut self, index: usize, source: &Path, target: &Path) {
        let renamable = self.job.mode == Mode::Move
            && self
                .collaborators
                .devices
                .same_device(source, &self.job.destination_path)
            && !entry_exists(target);

        if renamable {
            self.started(source);
            match fs_ops::rename_entry(source, target) {
                Ok(()) => {
                    let totals = self
                        .job
                        .source_totals
                        .get(index)
                        .copied()
                        .unwrap_or_default();
                    self.job.counts.files_renamed += totals.total_files;
                    self.job.bytes_transferred += totals.total_bytes;
                    self.job.entries_done += totals.total_entries();
                    debug!("renamed directory {} -> {}", source.display(), target.display());
                    self.emit(EntryEvent {
                        source,
                        destination: target,
                        is_dir: true,
                        state: FileState::Done,
                        action: Some(EntryAction::Renamed),
                        bytes: totals.total_bytes,
                    });
                    self.report_entries(source);
                    return;
                }
                Err(e)
                    if fs_ops::is_cross_device_error(&e)
                        || self.job.options.copy_fallback_on_rename_failure =>
                {
                    debug!(
                        "rename of {} failed ({}), moving entry by entry",
                        source.display(),
                        e
                    );
                }
                Err(e) => {
                    let error = EngineError::RenameFailed {
                        from: source.to_path_buf(),
                        path: target.to_path_buf(),
                        source: e,
                    };
                    self.fail_entry(source, target, error);
                    return;
                }
            }
        }

        if !self.prepare_directory(source, target) {
            return;
        }

        let options = WalkOptions {
            follow_symlinks: self.job.options.follow_symlinks,
            detect_cycles: true,
        };
        let filter = EntryFilter {
            hidden: self.job.options.include_hidden,
            ..EntryFilter::default()
        };
        let mut walker = DirectoryWalker::new(source, options).with_filter(filter);

        loop {
            if self.should_stop() {
                break;
            }
            let Some(entry) = walker.next() else {
                break;
            };
            let Ok(relative) = entry.path().strip_prefix(source) else {
                continue;
            };
            let destination = target.join(relative);

            if entry.is_dir() && (!entry.is_symlink() || self.job.options.follow_symlinks) {
                if !self.prepare_directory(entry.path(), &destination) {
                    walker.skip_subtree();
                }
            } else {
                self.transfer_file(entry.path(), &destination, entry.metadata());
                self.yield_point();
            }
        }

        if self.job.mode == Mode::Move && !self.should_stop() {
            self.moved_dirs.push(source.to_path_buf());
        }
    }

    /// Make `target` an empty directory ready to receive `source`'s entries.
    ///
    /// Returns false if the subtree must not be entered. An existing empty
    /// directory is reused; a non-empty one is a conflict and is never
    /// merged into.
    fn prepare_directory(&mut self, source: &Path, target: &Path) -> bool {
        self.started(source);
        match fs::symlink_metadata(target) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => match fs_ops::create_dir(target) {
                Ok(()) => {
                    self.job.counts.dirs_created += 1;
                    self.job.entries_done += 1;
                    self.emit(EntryEvent {
                        source,
                        destination: target,
                        is_dir: true,
                        state: FileState::Done,
                        action: Some(EntryAction::CreatedDir),
                        bytes: 0,
                    });
                    true
                }
                Err(error) => {
                    self.record_warning(target, error);
                    self.emit_dir(source, target, FileState::Failed);
                    false
                }
            },
            Ok(metadata) if metadata.is_dir() => match fs_ops::dir_is_empty(target) {
                Ok(true) => {
                    self.job.entries_done += 1;
                    self.emit_dir(source, target, FileState::Done);
                    true
                }
                Ok(false) => {
                    self.refuse_directory(ConflictKind::DirectoryNotEmpty, source, target);
                    false
                }
                Err(error) => {
                    self.record_warning(target, error);
                    self.emit_dir(source, target, FileState::Failed);
                    false
                }
            },
            Ok(_) => {
                self.refuse_directory(ConflictKind::TypeMismatch, source, target);
                false
            }
            Err(e) => {
                let error = EngineError::ReadError {
                    path: target.to_path_buf(),
                    source: e,
                };
                self.record_warning(target, error);
                self.emit_dir(source, target, FileState::Failed);
                false
            }
        }
    }

    fn refuse_directory(&mut self, kind: ConflictKind, source: &Path, target: &Path) {
        if self.resolve(kind, source, target) == Resolution::Cancel {
            return;
        }
        let path = target.to_path_buf();
        let error = match kind {
            ConflictKind::DirectoryNotEmpty => EngineError::DirectoryNotEmpty { path },
            _ => EngineError::TypeMismatch { path },
        };
        self.record_warning(target, error);
        self.emit_dir(source, target, FileState::Skipped);
    }

    /// Transfer a file or symbolic link.
    fn transfer_file(&mut self, source: &Path, target: &Path, metadata: &Metadata) {
        self.started(source);

        if !metadata.is_file() && !metadata.is_symlink() {
            let error = EngineError::ReadError {
                path: source.to_path_buf(),
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "not a regular file, directory or symbolic link",
                ),
            };
            self.fail_entry(source, target, error);
            return;
        }

        if !self.clear_destination(source, target) {
            return;
        }

        if self.job.mode == Mode::Move && self.collaborators.devices.same_device(source, target) {
            match fs_ops::rename_entry(source, target) {
                Ok(()) => {
                    self.finish_rename(source, target, metadata);
                    return;
                }
                Err(e)
                    if fs_ops::is_cross_device_error(&e)
                        || self.job.options.copy_fallback_on_rename_failure =>
                {
                    debug!("rename of {} failed ({}), copying instead", source.display(), e);
                }
                Err(e) => {
                    let error = EngineError::RenameFailed {
                        from: source.to_path_buf(),
                        path: target.to_path_buf(),
                        source: e,
                    };
                    self.fail_entry(source, target, error);
                    return;
                }
            }
        }

        self.copy_entry(source, target, metadata);
    }

    /// Resolve an occupied destination. Returns true if the transfer may
    /// proceed onto a now-free `target`.
    fn clear_destination(&mut self, source: &Path, target: &Path) -> bool {
        let existing = match fs::symlink_metadata(target) {
            Ok(existing) => existing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return true,
            Err(e) => {
                let error = EngineError::ReadError {
                    path: target.to_path_buf(),
                    source: e,
                };
                self.fail_entry(source, target, error);
                return false;
            }
        };

        let kind = if existing.is_dir() {
            ConflictKind::TypeMismatch
        } else {
            ConflictKind::FileExists
        };
        let path = target.to_path_buf();
        match self.resolve(kind, source, target) {
            Resolution::Cancel => false,
            Resolution::Overwrite if kind == ConflictKind::FileExists => {
                match fs_ops::remove_file_entry(target) {
                    Ok(()) => {
                        debug!("removed existing {}", target.display());
                        true
                    }
                    Err(error) => {
                        self.fail_entry(source, target, error);
                        false
                    }
                }
            }
            Resolution::Overwrite => {
                self.skip_entry(source, target, EngineError::TypeMismatch { path });
                false
            }
            Resolution::Skip => {
                let error = match kind {
                    ConflictKind::FileExists => EngineError::DestinationExists { path },
                    _ => EngineError::TypeMismatch { path },
                };
                self.skip_entry(source, target, error);
                false
            }
        }
    }

    fn finish_rename(&mut self, source: &Path, target: &Path, metadata: &Metadata) {
        let bytes = if metadata.is_file() { metadata.len() } else { 0 };
        self.job.counts.files_renamed += 1;
        self.job.bytes_transferred += bytes;
        self.job.entries_done += 1;
        debug!("renamed {} -> {}", source.display(), target.display());
        self.emit(EntryEvent {
            source,
            destination: target,
            is_dir: false,
            state: FileState::Done,
            action: Some(EntryAction::Renamed),
            bytes,
        });

        let every = self.job.options.rename_progress_every.max(1);
        if self.job.counts.files_renamed % every == 0 {
            self.report_entries(source);
        } else {
            self.unreported_rename = Some(source.to_path_buf());
        }
    }

    /// Copy through a part file, then (for a move) remove the source.
    fn copy_entry(&mut self, source: &Path, target: &Path, metadata: &Metadata) {
        let as_link = metadata.is_symlink() && !self.job.options.follow_symlinks;
        let copied = if as_link {
            fs_ops::copy_symlink(source, target).map(|()| 0)
        } else {
            fs_ops::copy_file_staged(
                source,
                target,
                &self.job.temp_paths,
                self.job.options.buffer_size,
                self.job.options.preserve_permissions,
            )
        };
        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(error) => {
                self.fail_entry(source, target, error);
                return;
            }
        };

        if let (Some(algorithm), false) = (self.job.options.verify, as_link) {
            if let Err(error) =
                checksums::verify_copy(source, target, algorithm, self.job.options.buffer_size)
            {
                // The source stays in place for a move.
                self.fail_entry(source, target, error);
                return;
            }
        }

        self.job.counts.files_copied += 1;
        self.job.bytes_transferred += bytes;
        self.job.entries_done += 1;
        self.emit(EntryEvent {
            source,
            destination: target,
            is_dir: false,
            state: FileState::Done,
            action: Some(if as_link {
                EntryAction::Linked
            } else {
                EntryAction::Copied
            }),
            bytes,
        });
        if let Some(progress) = self.collaborators.progress {
            progress.on_progress(
                self.job.bytes_transferred,
                self.job.statistics.total_bytes,
                source,
            );
        }

        if self.job.mode == Mode::Move {
            if let Err(error) = fs_ops::remove_file_entry(source) {
                self.record_warning(source, error);
            }
        }
    }

    /// Remove source directories left empty by a move, deepest first.
    /// Directories still holding skipped or failed entries stay.
    fn remove_emptied_sources(&mut self) {
        for root in std::mem::take(&mut self.moved_dirs) {
            let filter = EntryFilter {
                files: false,
                ..EntryFilter::default()
            };
            let walker = DirectoryWalker::new(root.as_path(), WalkOptions::default()).with_filter(filter);

            let mut dirs = vec![root.clone()];
            dirs.extend(
                walker
                    .filter(|entry| !entry.is_symlink())
                    .map(|entry| entry.path().to_path_buf()),
            );
            for dir in dirs.iter().rev() {
                match fs::remove_dir(dir) {
                    Ok(()) => debug!("removed source directory {}", dir.display()),
                    Err(e) => debug!("keeping source directory {}: {}", dir.display(), e),
                }
            }
        }
    }

    fn resolve(&mut self, kind: ConflictKind, source: &Path, destination: &Path) -> Resolution {
        let resolution = self.collaborators.resolver.resolve(&Conflict {
            kind,
            source,
            destination,
        });
        debug!("{:?} at {}: {:?}", kind, destination.display(), resolution);
        if resolution == Resolution::Cancel {
            info!("job {}: cancelled at {}", self.job.id, destination.display());
            self.stopped = true;
        }
        resolution
    }

    fn skip_entry(&mut self, source: &Path, target: &Path, error: EngineError) {
        self.job.counts.files_skipped += 1;
        self.job.entries_done += 1;
        self.record_warning(target, error);
        self.emit_file(source, target, FileState::Skipped);
    }

    fn fail_entry(&mut self, source: &Path, target: &Path, error: EngineError) {
        self.job.counts.files_failed += 1;
        self.job.entries_done += 1;
        self.record_warning(source, error);
        self.emit_file(source, target, FileState::Failed);
    }

    fn record_warning(&mut self, fallback: &Path, error: EngineError) {
        let path = error.path().unwrap_or(fallback).to_path_buf();
        warn!("{}: {}", path.display(), error);
        self.job.warnings.push(EntryWarning { path, error });
    }

    fn started(&self, source: &Path) {
        if let Some(progress) = self.collaborators.progress {
            progress.on_file_started(&*self.job, source);
        }
    }

    fn emit(&self, event: EntryEvent<'_>) {
        if let Some(progress) = self.collaborators.progress {
            progress.on_file_completed(&*self.job, &event);
        }
    }

    fn emit_file(&self, source: &Path, target: &Path, state: FileState) {
        self.emit(EntryEvent {
            source,
            destination: target,
            is_dir: false,
            state,
            action: None,
            bytes: 0,
        });
    }

    fn emit_dir(&self, source: &Path, target: &Path, state: FileState) {
        self.emit(EntryEvent {
            source,
            destination: target,
            is_dir: true,
            state,
            action: None,
            bytes: 0,
        });
    }

    fn report_entries(&mut self, current: &Path) {
        self.unreported_rename = None;
        if let Some(progress) = self.collaborators.progress {
            progress.on_progress(
                self.job.entries_done,
                self.job.statistics.total_entries(),
                current,
            );
        }
    }

    fn yield_point(&self) {
        if let Some(progress) = self.collaborators.progress {
            progress.on_yield();
        }
    }
}

fn treat_as_directory(path: &Path, metadata: &Metadata, options: &EngineOptions) -> bool {
    metadata.is_dir() || (options.follow_symlinks && metadata.is_symlink() && path.is_dir())
}

fn entry_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Canonical form of `path` without resolving its last component, so a
/// symbolic link source stays the link itself.
fn canonical_entry(path: &Path) -> Result<PathBuf, EngineError> {
    let resolved = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            fs::canonicalize(parent).map(|parent| parent.join(name))
        }
        _ => fs::canonicalize(path),
    };
    resolved.map_err(|e| EngineError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Canonicalize the longest existing prefix of `path` and append the rest.
fn resolve_lenient(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = fs::canonicalize(existing) {
            return missing
                .iter()
                .rev()
                .fold(canonical, |resolved, name| resolved.join(name));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return absolute.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::{create_hasher, ChecksumAlgorithm};
    use crate::conflict::OverwritePolicy;
    use crate::device::StaticDevicePolicy;
    use crate::error::ErrorKind;
    use filetime::FileTime;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn write_file(path: &Path, contents: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent");
        }
        fs::write(path, contents).expect("Failed to write file");
    }

    /// src/{a.txt, b.txt, sub/c.txt}
    fn sample_tree(root: &Path) -> PathBuf {
        let src = root.join("src");
        write_file(&src.join("a.txt"), b"alpha");
        write_file(&src.join("b.txt"), b"bravo!");
        write_file(&src.join("sub").join("c.txt"), b"charlie charlie");
        src
    }

    fn names_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read_dir failed")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn run_transfer(request: TransferRequest, collaborators: &Collaborators<'_>) -> TransferReport {
        transfer(
            request,
            EngineOptions::default(),
            collaborators,
            &CancellationToken::new(),
        )
    }

    fn always_cancel(_conflict: &Conflict<'_>) -> Resolution {
        Resolution::Cancel
    }

    fn refuse_create(_destination: &Path) -> bool {
        false
    }

    #[test]
    fn test_copy_tree_produces_identical_tree() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = sample_tree(temp_dir.path());
        let dst = temp_dir.path().join("dst");

        let policy = OverwritePolicy::Skip;
        let report = run_transfer(
            TransferRequest::new([&src], &dst, Mode::Copy),
            &Collaborators::new(&policy),
        );

        assert!(report.outcome.is_completed(), "{:?}", report.outcome);
        assert_eq!(report.outcome.bytes_transferred(), 26);
        assert!(report.warnings.is_empty());
        assert_eq!(report.counts.files_copied, 3);
        assert_eq!(report.counts.dirs_created, 2);
        assert_eq!(report.statistics.total_files, 3);
        assert_eq!(report.statistics.total_dirs, 2);

        let copied = dst.join("src");
        assert_eq!(names_in(&copied), ["a.txt", "b.txt", "sub"]);
        assert_eq!(names_in(&copied.join("sub")), ["c.txt"]);
        for relative in ["a.txt", "b.txt", "sub/c.txt"] {
            assert_eq!(
                fs::read(copied.join(relative)).unwrap(),
                fs::read(src.join(relative)).unwrap()
            );
        }
        // Sources untouched
        assert!(src.join("sub").join("c.txt").exists());
    }

    #[test]
    fn test_move_same_device_renames() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("report.txt");
        write_file(&src, b"quarterly numbers");
        let dst = temp_dir.path().join("out");
        fs::create_dir(&dst).unwrap();

        let policy = OverwritePolicy::Skip;
        let devices = StaticDevicePolicy(true);
        let collaborators = Collaborators::new(&policy).with_devices(&devices);
        let report = run_transfer(TransferRequest::new([&src], &dst, Mode::Move), &collaborators);

        assert!(report.outcome.is_completed());
        assert_eq!(report.counts.files_renamed, 1);
        assert_eq!(report.counts.files_copied, 0);
        assert!(!src.exists());
        assert_eq!(fs::read(dst.join("report.txt")).unwrap(), b"quarterly numbers");
    }

    #[test]
    fn test_move_across_devices_copies_then_deletes() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("payload.bin");
        let content = b"payload bytes for another volume";
        write_file(&src, content);
        let dst = temp_dir.path().join("usb");
        fs::create_dir(&dst).unwrap();

        let policy = OverwritePolicy::Skip;
        let devices = StaticDevicePolicy(false);
        let collaborators = Collaborators::new(&policy).with_devices(&devices);
        let options = EngineOptions {
            verify: Some(ChecksumAlgorithm::Sha256),
            ..EngineOptions::default()
        };
        let report = transfer(
            TransferRequest::new([&src], &dst, Mode::Move),
            options,
            &collaborators,
            &CancellationToken::new(),
        );

        assert!(report.outcome.is_completed(), "{:?}", report.outcome);
        assert_eq!(report.counts.files_copied, 1);
        assert_eq!(report.counts.files_renamed, 0);
        assert!(!src.exists());

        let moved = dst.join("payload.bin");
        let mut expected = create_hasher(ChecksumAlgorithm::Sha256, None).unwrap();
        expected.update(content);
        let actual = checksums::hash_file(&checksums::DigestRequest::new(
            &moved,
            ChecksumAlgorithm::Sha256,
        ))
        .unwrap();
        assert_eq!(actual, expected.finalize());
    }

    #[test]
    fn test_move_directory_same_device_is_single_rename() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = sample_tree(temp_dir.path());
        let dst = temp_dir.path().join("dst");
        fs::create_dir(&dst).unwrap();

        let policy = OverwritePolicy::Skip;
        let devices = StaticDevicePolicy(true);
        let collaborators = Collaborators::new(&policy).with_devices(&devices);
        let report = run_transfer(TransferRequest::new([&src], &dst, Mode::Move), &collaborators);

        assert!(report.outcome.is_completed());
        assert_eq!(report.counts.files_renamed, 3);
        assert_eq!(report.counts.files_copied, 0);
        assert!(!src.exists());
        assert_eq!(names_in(&dst.join("src")), ["a.txt", "b.txt", "sub"]);
    }

    #[test]
    fn test_move_directory_across_devices_removes_source_tree() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = sample_tree(temp_dir.path());
        let dst = temp_dir.path().join("dst");
        fs::create_dir(&dst).unwrap();

        let policy = OverwritePolicy::Skip;
        let devices = StaticDevicePolicy(false);
        let collaborators = Collaborators::new(&policy).with_devices(&devices);
        let report = run_transfer(TransferRequest::new([&src], &dst, Mode::Move), &collaborators);

        assert!(report.outcome.is_completed(), "{:?}", report.outcome);
        assert_eq!(report.counts.files_copied, 3);
        assert!(!src.exists());
        assert_eq!(
            fs::read(dst.join("src").join("sub").join("c.txt")).unwrap(),
            b"charlie charlie"
        );
    }

    struct CancelAfter {
        limit: usize,
        files_done: AtomicUsize,
        token: CancellationToken,
    }

    impl ProgressCallback for CancelAfter {
        fn on_progress(&self, _done: u64, _total: u64, _current: &Path) {}

        fn on_file_completed(&self, _job: &TransferJob, event: &EntryEvent<'_>) {
            if !event.is_dir && self.files_done.fetch_add(1, Ordering::SeqCst) + 1 == self.limit {
                self.token.cancel();
            }
        }
    }

    #[test]
    fn test_cancel_after_n_files() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        for i in 0..5 {
            write_file(&src.join(format!("f{}.txt", i)), b"0123456789");
        }
        let dst = temp_dir.path().join("dst");

        let token = CancellationToken::new();
        let progress = CancelAfter {
            limit: 2,
            files_done: AtomicUsize::new(0),
            token: token.clone(),
        };
        let policy = OverwritePolicy::Skip;
        let collaborators = Collaborators::new(&policy).with_progress(&progress);
        let report = transfer(
            TransferRequest::new([&src], &dst, Mode::Copy),
            EngineOptions::default(),
            &collaborators,
            &token,
        );

        match report.outcome {
            TransferOutcome::Cancelled { bytes_transferred } => assert_eq!(bytes_transferred, 20),
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert_eq!(names_in(&dst.join("src")), ["f0.txt", "f1.txt"]);
        assert_eq!(names_in(&src).len(), 5);
    }

    #[test]
    fn test_copy_into_descendant_is_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = sample_tree(temp_dir.path());
        let inside = src.join("nested").join("copy");

        let err = create_job(
            TransferRequest::new([&src], &inside, Mode::Copy),
            EngineOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::DestinationInsideSource { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);

        let policy = OverwritePolicy::Overwrite;
        let report = run_transfer(
            TransferRequest::new([&src], &inside, Mode::Copy),
            &Collaborators::new(&policy),
        );
        assert!(matches!(report.outcome, TransferOutcome::Failed { .. }));
        assert!(!src.join("nested").exists());
        assert_eq!(names_in(&src), ["a.txt", "b.txt", "sub"]);
    }

    #[test]
    fn test_same_source_and_destination_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = sample_tree(temp_dir.path());
        let file = src.join("a.txt");

        let into_itself = create_job(
            TransferRequest::new([&src], &src, Mode::Copy),
            EngineOptions::default(),
        );
        assert!(matches!(
            into_itself,
            Err(EngineError::SameSourceAndDestination { .. })
        ));

        let into_own_parent = create_job(
            TransferRequest::new([&file], &src, Mode::Move),
            EngineOptions::default(),
        );
        assert!(matches!(
            into_own_parent,
            Err(EngineError::SameSourceAndDestination { .. })
        ));
    }

    #[test]
    fn test_create_job_validation_errors() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dst = temp_dir.path().join("dst");

        let missing = create_job(
            TransferRequest::new([temp_dir.path().join("nope")], &dst, Mode::Copy),
            EngineOptions::default(),
        );
        assert!(matches!(missing, Err(EngineError::SourceNotFound { .. })));

        let empty = create_job(
            TransferRequest::new(Vec::<PathBuf>::new(), &dst, Mode::Copy),
            EngineOptions::default(),
        );
        assert!(matches!(empty, Err(EngineError::NoSources)));

        let file = temp_dir.path().join("file.txt");
        write_file(&file, b"x");

        let source = temp_dir.path().join("other.txt");
        write_file(&source, b"y");
        let dest_is_file = create_job(
            TransferRequest::new([&source], &file, Mode::Copy),
            EngineOptions::default(),
        );
        assert!(matches!(
            dest_is_file,
            Err(EngineError::DestinationNotDirectory { .. })
        ));

        let zero_buffer = create_job(
            TransferRequest::new([&source], &dst, Mode::Copy),
            EngineOptions {
                buffer_size: 0,
                ..EngineOptions::default()
            },
        );
        assert!(matches!(zero_buffer, Err(EngineError::ZeroBufferSize)));
    }

    #[test]
    fn test_plan_job_counts_sources() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = sample_tree(temp_dir.path());
        let single = temp_dir.path().join("single.txt");
        write_file(&single, b"1234");

        let mut job = create_job(
            TransferRequest::new([&src, &single], temp_dir.path().join("dst"), Mode::Copy),
            EngineOptions::default(),
        )
        .expect("Failed to create job");
        assert_eq!(job.state, JobState::Validating);

        plan_job(&mut job, &CancellationToken::new(), None).expect("Failed to plan job");
        assert!(job.planned);
        assert_eq!(job.state, JobState::PreScanning);
        assert_eq!(job.statistics.total_files, 4);
        assert_eq!(job.statistics.total_dirs, 2);
        assert_eq!(job.statistics.total_bytes, 30);
        assert_eq!(job.source_totals.len(), 2);
    }

    #[test]
    fn test_plan_job_observes_cancellation() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = sample_tree(temp_dir.path());
        let mut job = create_job(
            TransferRequest::new([&src], temp_dir.path().join("dst"), Mode::Copy),
            EngineOptions::default(),
        )
        .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let result = plan_job(&mut job, &token, None);
        assert!(matches!(result, Err(EngineError::Cancelled)));

        let policy = OverwritePolicy::Skip;
        let report = run_job(&mut job, &Collaborators::new(&policy), &token);
        assert!(report.outcome.is_cancelled());
        assert_eq!(job.state, JobState::Cancelled);
        assert!(!temp_dir.path().join("dst").exists());
    }

    #[test]
    fn test_conflict_skip_keeps_existing_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.txt");
        write_file(&src, b"new");
        let dst = temp_dir.path().join("dst");
        write_file(&dst.join("a.txt"), b"old");

        let policy = OverwritePolicy::Skip;
        let report = run_transfer(
            TransferRequest::new([&src], &dst, Mode::Copy),
            &Collaborators::new(&policy),
        );

        assert!(report.outcome.is_completed());
        assert_eq!(report.counts.files_skipped, 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].error.kind(), ErrorKind::Conflict);
        assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"old");
    }

    #[test]
    fn test_conflict_overwrite_replaces_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.txt");
        write_file(&src, b"new");
        let dst = temp_dir.path().join("dst");
        write_file(&dst.join("a.txt"), b"old and longer");

        let policy = OverwritePolicy::Overwrite;
        let report = run_transfer(
            TransferRequest::new([&src], &dst, Mode::Copy),
            &Collaborators::new(&policy),
        );

        assert!(report.outcome.is_completed());
        assert!(report.warnings.is_empty());
        assert_eq!(report.counts.files_copied, 1);
        assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"new");
        assert_eq!(names_in(&dst), ["a.txt"]);
    }

    #[test]
    fn test_conflict_cancel_stops_request() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let first = temp_dir.path().join("a.txt");
        let second = temp_dir.path().join("b.txt");
        write_file(&first, b"first");
        write_file(&second, b"second");
        let dst = temp_dir.path().join("dst");
        write_file(&dst.join("a.txt"), b"occupied");

        let report = run_transfer(
            TransferRequest::new([&first, &second], &dst, Mode::Copy),
            &Collaborators::new(&always_cancel),
        );

        assert!(report.outcome.is_cancelled());
        assert_eq!(names_in(&dst), ["a.txt"]);
        assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"occupied");
    }

    #[test]
    fn test_non_empty_destination_directory_is_not_merged() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = sample_tree(temp_dir.path());
        let dst = temp_dir.path().join("dst");
        write_file(&dst.join("src").join("keep.txt"), b"mine");

        let policy = OverwritePolicy::Overwrite;
        let report = run_transfer(
            TransferRequest::new([&src], &dst, Mode::Copy),
            &Collaborators::new(&policy),
        );

        assert!(report.outcome.is_completed());
        assert_eq!(report.warnings.len(), 1);
        assert!(matches!(
            report.warnings[0].error,
            EngineError::DirectoryNotEmpty { .. }
        ));
        assert_eq!(names_in(&dst.join("src")), ["keep.txt"]);
    }

    #[test]
    fn test_empty_destination_directory_is_reused() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = sample_tree(temp_dir.path());
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(dst.join("src")).unwrap();

        let policy = OverwritePolicy::Skip;
        let report = run_transfer(
            TransferRequest::new([&src], &dst, Mode::Copy),
            &Collaborators::new(&policy),
        );

        assert!(report.outcome.is_completed());
        assert_eq!(report.counts.files_copied, 3);
        assert_eq!(report.counts.dirs_created, 1);
    }

    #[test]
    fn test_declined_destination_cancels_untouched() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = sample_tree(temp_dir.path());
        let dst = temp_dir.path().join("not-yet");

        let policy = OverwritePolicy::Skip;
        let collaborators = Collaborators::new(&policy).with_destination_prompt(&refuse_create);
        let report = run_transfer(TransferRequest::new([&src], &dst, Mode::Copy), &collaborators);

        match report.outcome {
            TransferOutcome::Cancelled { bytes_transferred } => assert_eq!(bytes_transferred, 0),
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert!(!dst.exists());
    }

    #[test]
    fn test_copy_preserves_modification_time() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("photo.jpg");
        write_file(&src, b"jpeg");
        let taken = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(3_600 * 24 * 30));
        filetime::set_file_mtime(&src, taken).unwrap();
        let dst = temp_dir.path().join("dst");

        let policy = OverwritePolicy::Skip;
        let report = run_transfer(
            TransferRequest::new([&src], &dst, Mode::Copy),
            &Collaborators::new(&policy),
        );

        assert!(report.outcome.is_completed());
        let original = fs::metadata(&src).unwrap();
        let copied = fs::metadata(dst.join("photo.jpg")).unwrap();
        assert_eq!(
            FileTime::from_last_modification_time(&copied),
            FileTime::from_last_modification_time(&original)
        );
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl ProgressCallback for Recorder {
        fn on_job_started(&self, job: &TransferJob) {
            self.push(format!("start:{:?}", job.state));
        }

        fn on_file_started(&self, _job: &TransferJob, source: &Path) {
            self.push(format!("file:{}", source.file_name().unwrap().to_string_lossy()));
        }

        fn on_progress(&self, done: u64, total: u64, _current: &Path) {
            self.push(format!("progress:{}/{}", done, total));
        }

        fn on_file_completed(&self, _job: &TransferJob, event: &EntryEvent<'_>) {
            self.push(format!("done:{:?}:{:?}", event.state, event.action));
        }

        fn on_job_completed(&self, job: &TransferJob, outcome: &TransferOutcome) {
            self.push(format!("end:{:?}:{}", job.state, outcome.is_completed()));
        }
    }

    #[test]
    fn test_callback_order() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.txt");
        write_file(&src, b"abc");
        let dst = temp_dir.path().join("dst");

        let recorder = Recorder::default();
        let policy = OverwritePolicy::Skip;
        let collaborators = Collaborators::new(&policy).with_progress(&recorder);
        let report = run_transfer(TransferRequest::new([&src], &dst, Mode::Copy), &collaborators);
        assert!(report.outcome.is_completed());

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(
            events,
            [
                "start:Transferring",
                "file:a.txt",
                "done:Done:Some(Copied)",
                "progress:3/3",
                "end:Completed:true",
            ]
        );
    }

    #[test]
    fn test_no_part_files_left_behind() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = sample_tree(temp_dir.path());
        let dst = temp_dir.path().join("dst");

        let policy = OverwritePolicy::Skip;
        let options = EngineOptions {
            buffer_size: 3,
            verify: Some(ChecksumAlgorithm::Blake3),
            ..EngineOptions::default()
        };
        let report = transfer(
            TransferRequest::new([&src], &dst, Mode::Copy),
            options,
            &Collaborators::new(&policy),
            &CancellationToken::new(),
        );
        assert!(report.outcome.is_completed());

        let leftovers = DirectoryWalker::new(&dst, WalkOptions::default())
            .filter(|entry| entry.path().to_string_lossy().ends_with(".part"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_hidden_entries_excluded_on_request() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = sample_tree(temp_dir.path());
        write_file(&src.join(".cache"), b"tmp");
        let dst = temp_dir.path().join("dst");

        let policy = OverwritePolicy::Skip;
        let options = EngineOptions {
            include_hidden: false,
            ..EngineOptions::default()
        };
        let report = transfer(
            TransferRequest::new([&src], &dst, Mode::Copy),
            options,
            &Collaborators::new(&policy),
            &CancellationToken::new(),
        );
        assert!(report.outcome.is_completed());
        assert_eq!(names_in(&dst.join("src")), ["a.txt", "b.txt", "sub"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_recreated() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = sample_tree(temp_dir.path());
        std::os::unix::fs::symlink("a.txt", src.join("link")).unwrap();
        let dst = temp_dir.path().join("dst");

        let policy = OverwritePolicy::Skip;
        let report = run_transfer(
            TransferRequest::new([&src], &dst, Mode::Copy),
            &Collaborators::new(&policy),
        );

        assert!(report.outcome.is_completed(), "{:?}", report.warnings);
        let link = dst.join("src").join("link");
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("a.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_followed_link_into_its_own_target_is_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let real = temp_dir.path().join("real");
        write_file(&real.join("x.txt"), b"x");
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let options = EngineOptions {
            follow_symlinks: true,
            ..EngineOptions::default()
        };

        let inside = real.join("sub").join("out");
        let err = create_job(TransferRequest::new([&link], &inside, Mode::Copy), options.clone())
            .unwrap_err();
        assert!(matches!(err, EngineError::DestinationInsideSource { .. }), "{:?}", err);
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = create_job(TransferRequest::new([&link], &real, Mode::Copy), options.clone())
            .unwrap_err();
        assert!(matches!(err, EngineError::SameSourceAndDestination { .. }), "{:?}", err);

        let policy = OverwritePolicy::Skip;
        let report = transfer(
            TransferRequest::new([&link], &inside, Mode::Copy),
            options,
            &Collaborators::new(&policy),
            &CancellationToken::new(),
        );
        assert!(matches!(report.outcome, TransferOutcome::Failed { .. }));
        assert!(!real.join("sub").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_unfollowed_link_into_its_own_target_is_copied_as_link() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let real = temp_dir.path().join("real");
        write_file(&real.join("x.txt"), b"x");
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let policy = OverwritePolicy::Skip;
        let report = run_transfer(
            TransferRequest::new([&link], &real, Mode::Copy),
            &Collaborators::new(&policy),
        );

        assert!(report.outcome.is_completed(), "{:?}", report.outcome);
        assert_eq!(fs::read_link(real.join("link")).unwrap(), real);
    }

    fn three_files(root: &Path) -> Vec<PathBuf> {
        ["one.txt", "two.txt", "six.txt"]
            .iter()
            .map(|name| {
                let path = root.join(name);
                write_file(&path, b"abc");
                path
            })
            .collect()
    }

    fn progress_events(recorder: &Recorder) -> Vec<String> {
        recorder
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.starts_with("progress:"))
            .cloned()
            .collect()
    }

    #[test]
    fn test_rename_progress_reports_remainder() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let sources = three_files(temp_dir.path());
        let dst = temp_dir.path().join("dst");
        fs::create_dir(&dst).unwrap();

        let recorder = Recorder::default();
        let policy = OverwritePolicy::Skip;
        let devices = StaticDevicePolicy(true);
        let collaborators = Collaborators::new(&policy)
            .with_progress(&recorder)
            .with_devices(&devices);
        let report = run_transfer(TransferRequest::new(&sources, &dst, Mode::Move), &collaborators);

        assert!(report.outcome.is_completed(), "{:?}", report.outcome);
        assert_eq!(report.counts.files_renamed, 3);
        assert_eq!(progress_events(&recorder), ["progress:3/3"]);
    }

    #[test]
    fn test_rename_progress_every_n_then_remainder() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let sources = three_files(temp_dir.path());
        let dst = temp_dir.path().join("dst");
        fs::create_dir(&dst).unwrap();

        let recorder = Recorder::default();
        let policy = OverwritePolicy::Skip;
        let devices = StaticDevicePolicy(true);
        let collaborators = Collaborators::new(&policy)
            .with_progress(&recorder)
            .with_devices(&devices);
        let options = EngineOptions {
            rename_progress_every: 2,
            ..EngineOptions::default()
        };
        let report = transfer(
            TransferRequest::new(&sources, &dst, Mode::Move),
            options,
            &collaborators,
            &CancellationToken::new(),
        );

        assert!(report.outcome.is_completed(), "{:?}", report.outcome);
        assert_eq!(progress_events(&recorder), ["progress:2/3", "progress:3/3"]);
    }

    /// Removes the destination directory as soon as the first entry starts,
    /// like a volume that goes away mid-transfer.
    struct UnplugDestination {
        destination: PathBuf,
    }

    impl ProgressCallback for UnplugDestination {
        fn on_progress(&self, _done: u64, _total: u64, _current: &Path) {}

        fn on_file_started(&self, _job: &TransferJob, _source: &Path) {
            let _ = fs::remove_dir_all(&self.destination);
        }
    }

    fn move_with_unplugged_destination(root: &Path, same_device: bool, copy_fallback: bool) -> TransferReport {
        let src = root.join("ledger.csv");
        write_file(&src, b"date,amount\n");
        let dst = root.join("usb");
        fs::create_dir(&dst).unwrap();

        let unplug = UnplugDestination {
            destination: dst.clone(),
        };
        let policy = OverwritePolicy::Skip;
        let devices = StaticDevicePolicy(same_device);
        let collaborators = Collaborators::new(&policy)
            .with_progress(&unplug)
            .with_devices(&devices);
        let options = EngineOptions {
            copy_fallback_on_rename_failure: copy_fallback,
            verify: Some(ChecksumAlgorithm::Crc32),
            ..EngineOptions::default()
        };
        let report = transfer(
            TransferRequest::new([&src], &dst, Mode::Move),
            options,
            &collaborators,
            &CancellationToken::new(),
        );

        assert!(report.outcome.is_completed(), "{:?}", report.outcome);
        assert_eq!(report.counts.files_failed, 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(fs::read(&src).unwrap(), b"date,amount\n");
        assert!(!dst.join("ledger.csv").exists());
        report
    }

    #[test]
    fn test_failed_cross_device_copy_keeps_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let report = move_with_unplugged_destination(temp_dir.path(), false, false);
        assert_eq!(report.counts.files_copied, 0);
        assert!(matches!(report.warnings[0].error, EngineError::WriteError { .. }));
    }

    #[test]
    fn test_failed_rename_is_skipped_without_fallback() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let report = move_with_unplugged_destination(temp_dir.path(), true, false);
        assert_eq!(report.counts.files_renamed, 0);
        assert_eq!(report.counts.files_copied, 0);
        assert!(matches!(report.warnings[0].error, EngineError::RenameFailed { .. }));
    }

    #[test]
    fn test_failed_rename_falls_back_to_copy_when_configured() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let report = move_with_unplugged_destination(temp_dir.path(), true, true);
        // The copy was attempted after the rename and failed on its own.
        assert!(matches!(report.warnings[0].error, EngineError::WriteError { .. }));
    }

    #[test]
    fn test_destination_root_creation_failure_fails_job() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = sample_tree(temp_dir.path());
        let dst = temp_dir.path().join("backup");

        // Something else claims the name between the prompt and mkdir.
        let occupy = |path: &Path| fs::write(path, b"occupied").is_ok();
        let policy = OverwritePolicy::Skip;
        let collaborators = Collaborators::new(&policy).with_destination_prompt(&occupy);
        let report = run_transfer(TransferRequest::new([&src], &dst, Mode::Move), &collaborators);

        match &report.outcome {
            TransferOutcome::Failed { reason, .. } => {
                assert!(matches!(reason, EngineError::DirectoryCreationFailed { .. }));
                assert_eq!(reason.kind(), ErrorKind::Io);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(report.counts, TransferCounts::default());
        assert_eq!(names_in(&src), ["a.txt", "b.txt", "sub"]);
    }
}
