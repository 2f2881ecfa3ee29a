//! Request orchestration: decode, segment, select, resample, feather,
//! composite, encode.
//!
//! Every request walks the same forward-only state machine:
//!
//! ```text
//! Idle -> Initializing -> Ready -> Segmenting -> Resampling -> Feathering
//!      -> Compositing -> Encoding -> Complete
//! ```
//!
//! with `Failed(kind)` reachable from any non-terminal stage. Nothing is
//! retried; a failed request is re-run from `Idle` by the caller.

use std::fmt;
use std::sync::Arc;

use tracing::{instrument, Instrument};

use crate::config::Settings;
use crate::error::{ErrorKind, RemovalError, Result};
use crate::matte::{feather, resample, select_foreground, AlphaMask, FeatherParams, ResampleFilter};
use crate::output::{composite, encode_matte_png, encode_png, CompositeOutput};
use crate::progress::{ProgressSink, Scaled};
use crate::segmentation::{EngineLoader, SegmentationEngine};
use crate::session::Session;
use crate::source::SourceImage;

/// Pipeline state of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Initializing,
    Ready,
    Segmenting,
    Resampling,
    Feathering,
    Compositing,
    Encoding,
    Complete,
    Failed(ErrorKind),
}

impl Stage {
    fn order(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Initializing => 1,
            Self::Ready => 2,
            Self::Segmenting => 3,
            Self::Resampling => 4,
            Self::Feathering => 5,
            Self::Compositing => 6,
            Self::Encoding => 7,
            Self::Complete => 8,
            Self::Failed(_) => 9,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }

    /// User-facing stage name and its fixed percent, if the stage reports one.
    ///
    /// `Initializing` and `Ready` are covered by the session's own events,
    /// scaled into 5-25.
    pub fn progress(self) -> Option<(&'static str, u8)> {
        match self {
            Self::Idle => Some(("Preparing image", 0)),
            Self::Segmenting => Some(("Processing image", 30)),
            Self::Resampling => Some(("Resampling mask", 60)),
            Self::Feathering => Some(("Feathering edges", 70)),
            Self::Compositing => Some(("Generating transparent image", 80)),
            Self::Encoding => Some(("Finalizing", 90)),
            Self::Complete => Some(("Complete", 100)),
            Self::Initializing | Self::Ready | Self::Failed(_) => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "Failed({kind:?})"),
            other => write!(f, "{other:?}"),
        }
    }
}

const INIT_PROGRESS: (u8, u8) = (5, 25);

/// Forward-only stage tracker that reports each transition once.
pub struct StageMachine<'a> {
    stage: Stage,
    progress: &'a dyn ProgressSink,
}

impl<'a> StageMachine<'a> {
    pub fn new(progress: &'a dyn ProgressSink) -> Self {
        if let Some((label, percent)) = Stage::Idle.progress() {
            progress.emit(label, percent);
        }
        Self {
            stage: Stage::Idle,
            progress,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn progress(&self) -> &'a dyn ProgressSink {
        self.progress
    }

    /// Move forward to `next`. Stages may be skipped, never revisited.
    pub fn advance_to(&mut self, next: Stage) {
        debug_assert!(
            !self.stage.is_terminal() && next.order() > self.stage.order(),
            "illegal transition {} -> {}",
            self.stage,
            next
        );
        tracing::debug!(from = %self.stage, to = %next, "pipeline stage");
        self.stage = next;
        if let Some((label, percent)) = next.progress() {
            self.progress.emit(label, percent);
        }
    }

    /// Enter `Failed`, unless a terminal stage was already reached.
    pub fn fail(&mut self, err: &RemovalError) {
        if self.stage.is_terminal() {
            return;
        }
        tracing::warn!(stage = %self.stage, error = %err, "request failed");
        self.stage = Stage::Failed(err.kind());
    }
}

/// Encoded result of one request.
#[derive(Debug, Clone)]
pub struct Cutout {
    pub composite: CompositeOutput,
    /// Lossless PNG of `composite`
    pub png: Vec<u8>,
}

/// Background remover bound to a shared session.
pub struct Remover<L: EngineLoader> {
    session: Arc<Session<L>>,
    params: FeatherParams,
    filter: ResampleFilter,
}

impl<L: EngineLoader> Remover<L> {
    pub fn new(session: Arc<Session<L>>, settings: &Settings) -> Self {
        Self {
            session,
            params: settings.feather,
            filter: settings.resample.filter,
        }
    }

    pub fn with_params(session: Arc<Session<L>>, params: FeatherParams, filter: ResampleFilter) -> Self {
        Self {
            session,
            params,
            filter,
        }
    }

    pub fn session(&self) -> &Arc<Session<L>> {
        &self.session
    }

    /// Decode `file_bytes`, remove the background and encode the result.
    #[instrument(skip_all, fields(bytes = file_bytes.len()))]
    pub async fn process(&self, file_bytes: &[u8], progress: &dyn ProgressSink) -> Result<Cutout> {
        let mut machine = StageMachine::new(progress);
        let result = async {
            let source = Arc::new(SourceImage::decode(file_bytes)?);
            self.run(source, &mut machine).await
        }
        .await;
        finish(&mut machine, result)
    }

    /// Same as [`Remover::process`] for an already decoded image.
    pub async fn process_image(&self, source: &SourceImage, progress: &dyn ProgressSink) -> Result<Cutout> {
        let mut machine = StageMachine::new(progress);
        let result = self.run(Arc::new(source.clone()), &mut machine).await;
        finish(&mut machine, result)
    }

    /// Stop after feathering and encode the alpha mask as grayscale PNG.
    #[instrument(skip_all, fields(bytes = file_bytes.len()))]
    pub async fn matte(&self, file_bytes: &[u8], progress: &dyn ProgressSink) -> Result<Vec<u8>> {
        let mut machine = StageMachine::new(progress);
        let result = async {
            let source = SourceImage::decode(file_bytes)?;
            let alpha = self.alpha(&source, &mut machine).await?;
            machine.advance_to(Stage::Encoding);
            let png = offload(move || encode_matte_png(&alpha)).await??;
            machine.advance_to(Stage::Complete);
            Ok::<_, RemovalError>(png)
        }
        .await;
        finish(&mut machine, result)
    }

    async fn run(&self, source: Arc<SourceImage>, machine: &mut StageMachine<'_>) -> Result<Cutout> {
        let alpha = self.alpha(&source, machine).await?;

        machine.advance_to(Stage::Compositing);
        let composite = offload(move || composite(&source, &alpha)).await?;

        machine.advance_to(Stage::Encoding);
        let (composite, png) = offload(move || {
            let png = encode_png(&composite)?;
            Ok::<_, RemovalError>((composite, png))
        })
        .await??;

        machine.advance_to(Stage::Complete);
        tracing::info!(
            "Removed background from {}x{} image ({} bytes)",
            composite.width(),
            composite.height(),
            png.len()
        );
        Ok(Cutout { composite, png })
    }

    async fn alpha(&self, source: &SourceImage, machine: &mut StageMachine<'_>) -> Result<AlphaMask> {
        machine.advance_to(Stage::Initializing);
        let (lo, hi) = INIT_PROGRESS;
        let engine = self
            .session
            .ensure_ready(&Scaled::new(machine.progress(), lo, hi))
            .await?;
        machine.advance_to(Stage::Ready);

        machine.advance_to(Stage::Segmenting);
        let segments = engine
            .segment(source)
            .instrument(tracing::debug_span!("inference"))
            .await
            .map_err(|err| match err {
                RemovalError::Segmentation(_) | RemovalError::InvalidSegmentationResult(_) => err,
                other => RemovalError::Segmentation(other.to_string()),
            })?;
        tracing::debug!("Engine returned {} segments", segments.len());
        let foreground = select_foreground(&segments)?;

        machine.advance_to(Stage::Resampling);
        let mask = foreground.mask().clone();
        let (width, height) = source.dimensions();
        let filter = self.filter;
        let resampled = offload(move || resample(&mask, width, height, filter)).await?;

        machine.advance_to(Stage::Feathering);
        let params = self.params;
        offload(move || feather(&resampled, &params)).await
    }
}

/// Run CPU-bound pixel work on the blocking pool.
///
/// A panic in `work` resumes on the calling task.
async fn offload<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let span = tracing::Span::current();
    match tokio::task::spawn_blocking(move || span.in_scope(work)).await {
        Ok(value) => Ok(value),
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(RemovalError::Interrupted(err.to_string())),
    }
}

fn finish<T>(machine: &mut StageMachine<'_>, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        machine.fail(err);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{NoProgress, ProgressEvent};
    use std::sync::Mutex as StdMutex;

    #[test]
    fn stages_are_strictly_ordered() {
        let path = [
            Stage::Idle,
            Stage::Initializing,
            Stage::Ready,
            Stage::Segmenting,
            Stage::Resampling,
            Stage::Feathering,
            Stage::Compositing,
            Stage::Encoding,
            Stage::Complete,
        ];
        assert!(path.windows(2).all(|w| w[0].order() < w[1].order()));
        assert!(Stage::Complete.is_terminal());
        assert!(Stage::Failed(ErrorKind::NoForeground).is_terminal());
        assert!(!Stage::Encoding.is_terminal());
    }

    #[test]
    fn progress_schedule_is_non_decreasing() {
        let percents: Vec<u8> = [
            Stage::Idle,
            Stage::Segmenting,
            Stage::Resampling,
            Stage::Feathering,
            Stage::Compositing,
            Stage::Encoding,
            Stage::Complete,
        ]
        .iter()
        .filter_map(|s| s.progress().map(|(_, p)| p))
        .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert!(percents[0] <= INIT_PROGRESS.0 && INIT_PROGRESS.1 <= percents[1]);
    }

    #[test]
    fn machine_reports_each_transition_once() {
        let seen = StdMutex::new(Vec::new());
        let sink = |event: &ProgressEvent| seen.lock().unwrap().push(event.stage.clone());

        let mut machine = StageMachine::new(&sink);
        machine.advance_to(Stage::Initializing);
        machine.advance_to(Stage::Ready);
        machine.advance_to(Stage::Segmenting);
        assert_eq!(machine.stage(), Stage::Segmenting);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["Preparing image".to_string(), "Processing image".to_string()]
        );
    }

    #[test]
    fn failure_is_terminal_and_sticky() {
        let mut machine = StageMachine::new(&NoProgress);
        machine.advance_to(Stage::Initializing);
        machine.fail(&RemovalError::ModelInit("offline".into()));
        assert_eq!(machine.stage(), Stage::Failed(ErrorKind::ModelInit));

        machine.fail(&RemovalError::NoForeground);
        assert_eq!(machine.stage(), Stage::Failed(ErrorKind::ModelInit));
    }

    #[tokio::test]
    async fn offload_runs_off_the_calling_thread() {
        let caller = std::thread::current().id();
        let worker = offload(|| std::thread::current().id()).await.unwrap();
        assert_ne!(caller, worker);
    }

    #[tokio::test]
    #[should_panic(expected = "alpha mask must match source dimensions")]
    async fn offload_propagates_panics() {
        let source = SourceImage::from_rgba(image::RgbaImage::new(2, 2));
        let alpha = AlphaMask::from_gray(image::GrayImage::new(3, 2));
        let _ = offload(move || composite(&source, &alpha)).await;
    }

    #[test]
    fn complete_is_not_overwritten_by_failure() {
        let mut machine = StageMachine::new(&NoProgress);
        machine.advance_to(Stage::Complete);
        machine.fail(&RemovalError::Encoding("late".into()));
        assert_eq!(machine.stage(), Stage::Complete);
    }
}
