//! Whole-video orchestration.
//!
//! Probes a container once, then drives every subtitle track through
//! extraction, classification and persistence with a bounded number of
//! transcodes in flight. Only a probe failure aborts the run; everything else
//! is recorded per track in the [`RunReport`].

use crate::config::PipelineConfig;
use crate::decode::DecodedText;
use crate::error::{ExtractionError, ProbeError};
use crate::language::{is_known_language, languages_match, LanguageClassifier, UNKNOWN_LANGUAGE};
use crate::staging::StagingArea;
use crate::store::{RecordStore, SaveOutcome, SubtitleRecord};
use crate::track::{Extracted, SkipReason, TrackExtractor};
use crate::video::{with_timeout, Prober, TrackDescriptor, Transcoder, Video};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Terminal state of one track.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum TrackOutcome {
    Skipped(SkipReason),
    ExtractionFailed(String),
    DecodeFailed(String),
    PersistFailed(String),
    /// `duplicate` is set when the store already held this track.
    Persisted { duplicate: bool },
}

/// Declared tag disagreeing with the classified language. Informational only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageMismatch {
    pub declared: String,
    pub classified: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackReport {
    pub track_index: usize,
    pub declared_language: Option<String>,
    pub outcome: TrackOutcome,
    pub mismatch: Option<LanguageMismatch>,
}

/// Result of one [`SubtitlePipeline::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub video_id: String,
    /// Records inserted by this run.
    pub records: Vec<SubtitleRecord>,
    /// One entry per probed track, by track index.
    pub tracks: Vec<TrackReport>,
}

impl RunReport {
    pub fn track(&self, index: usize) -> Option<&TrackReport> {
        self.tracks.iter().find(|t| t.track_index == index)
    }

    /// Tracks that ended in anything but a skip or a successful save.
    pub fn failures(&self) -> impl Iterator<Item = &TrackReport> {
        self.tracks.iter().filter(|t| {
            !matches!(
                t.outcome,
                TrackOutcome::Skipped(_) | TrackOutcome::Persisted { .. }
            )
        })
    }
}

/// Extracts, classifies and stores every subtitle track of a video.
pub struct SubtitlePipeline<P, T, S> {
    prober: P,
    transcoder: T,
    store: S,
    classifier: LanguageClassifier,
    staging: StagingArea,
    concurrency: usize,
    probe_timeout: Duration,
    track_timeout: Duration,
}

impl<P, T, S> SubtitlePipeline<P, T, S>
where
    P: Prober,
    T: Transcoder,
    S: RecordStore,
{
    pub fn new(prober: P, transcoder: T, store: S, config: &PipelineConfig) -> Self {
        Self {
            prober,
            transcoder,
            store,
            classifier: LanguageClassifier::new(config.classifier.clone()),
            staging: StagingArea::new(&config.staging_dir),
            concurrency: config.concurrency(),
            probe_timeout: config.probe_timeout(),
            track_timeout: config.track_timeout(),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_track_timeout(mut self, timeout: Duration) -> Self {
        self.track_timeout = timeout;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Process every subtitle track of `video`.
    ///
    /// Fails only when probing fails or times out; no track is touched and
    /// nothing is staged in that case.
    pub async fn run(&self, video: &Video) -> Result<RunReport, ProbeError> {
        info!(video_id = %video.id, "probing {}", video.path.display());
        let tracks = with_timeout(
            self.probe_timeout,
            self.prober.probe(&video.path),
            ProbeError::Timeout,
        )
        .await
        .map_err(|e| {
            error!(video_id = %video.id, "probe failed: {e}");
            e
        })?;

        let mut report = RunReport {
            video_id: video.id.clone(),
            records: Vec::new(),
            tracks: Vec::with_capacity(tracks.len()),
        };
        if tracks.is_empty() {
            info!(video_id = %video.id, "no subtitle tracks found");
            return Ok(report);
        }
        if let Err(e) = self.staging.ensure().await {
            warn!(
                video_id = %video.id,
                "cannot create staging dir {}: {e}",
                self.staging.dir().display()
            );
        }

        let begin = Instant::now();
        let extractor = TrackExtractor::new(&self.transcoder, &self.staging, self.track_timeout);
        let mut results: Vec<(TrackReport, Option<SubtitleRecord>)> = stream::iter(&tracks)
            .map(|track| self.process_track(&extractor, video, track))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by_key(|(r, _)| r.track_index);
        for (track_report, record) in results {
            report.records.extend(record);
            report.tracks.push(track_report);
        }
        info!(
            video_id = %video.id,
            "processed {} tracks, stored {} records in {} ms",
            report.tracks.len(),
            report.records.len(),
            begin.elapsed().as_millis()
        );
        Ok(report)
    }

    /// Carry one track to a terminal state. Never fails the run.
    async fn process_track(
        &self,
        extractor: &TrackExtractor<'_, T>,
        video: &Video,
        track: &TrackDescriptor,
    ) -> (TrackReport, Option<SubtitleRecord>) {
        trace!("process_track video_id={} track={}", video.id, track.index);
        let mut report = TrackReport {
            track_index: track.index,
            declared_language: track.declared_language.clone(),
            outcome: TrackOutcome::Persisted { duplicate: false },
            mismatch: None,
        };

        let decoded = match extractor.extract(video, track).await {
            Ok(Extracted::Decoded(decoded)) => decoded,
            Ok(Extracted::Skip(reason)) => {
                report.outcome = TrackOutcome::Skipped(reason);
                return (report, None);
            }
            Err(ExtractionError::Decode(e)) => {
                warn!(video_id = %video.id, track = track.index, "decode failed: {e}");
                report.outcome = TrackOutcome::DecodeFailed(e.to_string());
                return (report, None);
            }
            Err(e) => {
                warn!(video_id = %video.id, track = track.index, "extraction failed: {e}");
                report.outcome = TrackOutcome::ExtractionFailed(e.to_string());
                return (report, None);
            }
        };

        let record = self.classify(video, track, decoded, &mut report);
        match self.store.save(&record).await {
            Ok(SaveOutcome::Inserted) => {
                debug!(video_id = %video.id, track = track.index, "stored as {}", record.language);
                (report, Some(record))
            }
            Ok(SaveOutcome::AlreadyExists) => {
                info!(video_id = %video.id, track = track.index, "already stored, keeping existing record");
                report.outcome = TrackOutcome::Persisted { duplicate: true };
                (report, None)
            }
            Err(e) => {
                warn!(video_id = %video.id, track = track.index, "saving record failed: {e}");
                report.outcome = TrackOutcome::PersistFailed(e.to_string());
                (report, None)
            }
        }
    }

    /// Classify the text, note any disagreement with the declared tag and
    /// build the record. The classified language always wins.
    fn classify(
        &self,
        video: &Video,
        track: &TrackDescriptor,
        decoded: DecodedText,
        report: &mut TrackReport,
    ) -> SubtitleRecord {
        let declared = track.declared_language.as_deref();
        let language = self.classifier.classify(&decoded.text, declared);
        if let Some(declared) = declared.filter(|d| is_known_language(d)) {
            if language != UNKNOWN_LANGUAGE && !languages_match(declared, &language) {
                warn!(
                    video_id = %video.id,
                    track = track.index,
                    "declared language {declared} but content looks like {language}"
                );
                report.mismatch = Some(LanguageMismatch {
                    declared: declared.to_string(),
                    classified: language.clone(),
                });
            }
        }
        SubtitleRecord {
            video_id: video.id.clone(),
            track_index: decoded.track_index,
            language,
            text: decoded.text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassifierConfig;
    use crate::error::StoreError;
    use crate::store::MemoryRecordStore;
    use crate::track::tests::{Fake, FakeTranscoder};
    use crate::video::{TranscodeOutcome, Transcoder};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const ENGLISH: &str = "1\n00:00:01,000 --> 00:00:04,000\n\
        I told you already, we are not going back to that house tonight.\n\n\
        2\n00:00:04,500 --> 00:00:08,000\n\
        The weather is terrible and the roads are closed because of the storm.\n\n\
        3\n00:00:08,500 --> 00:00:11,000\n\
        We will wait here until the morning and then drive to the city together.\n";

    const KOREAN: &str = "1\n00:00:01,000 --> 00:00:03,000\n\
        오늘 밤에는 그 집으로 돌아가지 않을 거라고 이미 말했잖아.\n\n\
        2\n00:00:03,500 --> 00:00:06,000\n\
        날씨가 너무 나쁘고 폭풍 때문에 길이 모두 막혔어요.\n";

    enum FakeProber {
        Tracks(Vec<TrackDescriptor>),
        Corrupt,
        Hang,
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, _path: &Path) -> Result<Vec<TrackDescriptor>, ProbeError> {
            match self {
                FakeProber::Tracks(t) => Ok(t.clone()),
                FakeProber::Corrupt => Err(ProbeError::Tool {
                    tool: "ffprobe".into(),
                    message: "Invalid data found when processing input".into(),
                }),
                FakeProber::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl RecordStore for BrokenStore {
        async fn save(&self, _record: &SubtitleRecord) -> Result<SaveOutcome, StoreError> {
            Err(StoreError::Task("database is locked".into()))
        }

        async fn records(&self, _video_id: &str) -> Result<Vec<SubtitleRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn config(staging: PathBuf) -> PipelineConfig {
        PipelineConfig {
            staging_dir: staging,
            max_concurrent_transcodes: 2,
            classifier: ClassifierConfig {
                require_reliable: false,
                ..ClassifierConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    fn video() -> Video {
        Video::new("42", "/media/movie.mkv")
    }

    #[tokio::test]
    async fn no_tracks_is_empty_success() {
        let dir = tempfile::tempdir().unwrap();
        let p = SubtitlePipeline::new(
            FakeProber::Tracks(Vec::new()),
            FakeTranscoder::default(),
            MemoryRecordStore::new(),
            &config(dir.path().join("stage")),
        );
        let report = p.run(&video()).await.unwrap();
        assert!(report.records.is_empty());
        assert!(report.tracks.is_empty());
    }

    #[tokio::test]
    async fn english_track_stored_and_missing_track_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let tracks = vec![
            TrackDescriptor::new(0, Some("en")),
            TrackDescriptor::new(1, Some("de")),
        ];
        let tr = FakeTranscoder::default().with(0, Fake::Write(ENGLISH.as_bytes().to_vec()));
        let p = SubtitlePipeline::new(
            FakeProber::Tracks(tracks),
            tr,
            MemoryRecordStore::new(),
            &config(dir.path().join("stage")),
        );
        let report = p.run(&video()).await.unwrap();

        assert_eq!(
            report.records,
            vec![SubtitleRecord {
                video_id: "42".into(),
                track_index: 0,
                language: "eng".into(),
                text: ENGLISH.into(),
            }]
        );
        assert_eq!(report.track(0).unwrap().mismatch, None);
        assert_eq!(
            report.track(1).unwrap().outcome,
            TrackOutcome::Skipped(SkipReason::MissingTrack)
        );
        let skipped: Vec<usize> = report
            .tracks
            .iter()
            .filter(|t| matches!(t.outcome, TrackOutcome::Skipped(_)))
            .map(|t| t.track_index)
            .collect();
        assert_eq!(skipped, vec![1]);
        assert_eq!(report.failures().count(), 0);
        let stored = p.store().records("42").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].track_index, 0);
    }

    #[tokio::test]
    async fn probe_failure_aborts_without_staging() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("stage");
        let p = SubtitlePipeline::new(
            FakeProber::Corrupt,
            FakeTranscoder::default().with(0, Fake::Write(ENGLISH.as_bytes().to_vec())),
            MemoryRecordStore::new(),
            &config(staging.clone()),
        );
        let err = p.run(&video()).await.unwrap_err();
        assert!(matches!(err, ProbeError::Tool { .. }));
        assert!(p.store().is_empty());
        assert!(!staging.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_timeout_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let p = SubtitlePipeline::new(
            FakeProber::Hang,
            FakeTranscoder::default(),
            MemoryRecordStore::new(),
            &config(dir.path().join("stage")),
        )
        .with_probe_timeout(Duration::from_secs(5));
        let err = p.run(&video()).await.unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(_)));
    }

    #[tokio::test]
    async fn mismatch_is_noted_but_classified_language_stored() {
        let dir = tempfile::tempdir().unwrap();
        let p = SubtitlePipeline::new(
            FakeProber::Tracks(vec![TrackDescriptor::new(0, Some("en"))]),
            FakeTranscoder::default().with(0, Fake::Write(KOREAN.as_bytes().to_vec())),
            MemoryRecordStore::new(),
            &config(dir.path().join("stage")),
        );
        let report = p.run(&video()).await.unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].language, "kor");
        assert_eq!(
            report.track(0).unwrap().mismatch,
            Some(LanguageMismatch {
                declared: "en".into(),
                classified: "kor".into(),
            })
        );
    }

    #[tokio::test]
    async fn rerun_does_not_duplicate_records() {
        let dir = tempfile::tempdir().unwrap();
        let p = SubtitlePipeline::new(
            FakeProber::Tracks(vec![
                TrackDescriptor::new(0, Some("eng")),
                TrackDescriptor::new(1, Some("kor")),
            ]),
            FakeTranscoder::default()
                .with(0, Fake::Write(ENGLISH.as_bytes().to_vec()))
                .with(1, Fake::Write(KOREAN.as_bytes().to_vec())),
            MemoryRecordStore::new(),
            &config(dir.path().join("stage")),
        );
        let first = p.run(&video()).await.unwrap();
        let second = p.run(&video()).await.unwrap();
        assert_eq!(first.records.len(), 2);
        assert!(second.records.is_empty());
        assert!(second
            .tracks
            .iter()
            .all(|t| t.outcome == TrackOutcome::Persisted { duplicate: true }));
        assert_eq!(p.store().len(), 2);
    }

    #[tokio::test]
    async fn absurd_cue_timing_stays_within_the_track() {
        let dir = tempfile::tempdir().unwrap();
        let odd = ENGLISH.replacen("00:00:01,000", "9999999999999999:00:00,000", 1);
        let p = SubtitlePipeline::new(
            FakeProber::Tracks(vec![
                TrackDescriptor::new(0, Some("eng")),
                TrackDescriptor::new(1, Some("eng")),
            ]),
            FakeTranscoder::default()
                .with(0, Fake::Write(odd.clone().into_bytes()))
                .with(1, Fake::Write(odd.into_bytes())),
            MemoryRecordStore::new(),
            &config(dir.path().join("stage")),
        );
        let report = p.run(&video()).await.unwrap();
        assert_eq!(report.tracks.len(), 2);
        assert_eq!(report.records.len(), 2);
        assert!(report.records.iter().all(|r| r.language == "eng"));
    }

    #[tokio::test]
    async fn previous_run_artifact_is_not_stored_again() {
        let dir = tempfile::tempdir().unwrap();
        let tracks = vec![TrackDescriptor::new(0, Some("eng"))];
        let first = SubtitlePipeline::new(
            FakeProber::Tracks(tracks.clone()),
            FakeTranscoder::default().with(0, Fake::Write(ENGLISH.as_bytes().to_vec())),
            MemoryRecordStore::new(),
            &config(dir.path().join("stage")),
        );
        assert_eq!(first.run(&video()).await.unwrap().records.len(), 1);

        let second = SubtitlePipeline::new(
            FakeProber::Tracks(tracks),
            FakeTranscoder::default().with(0, Fake::WriteNothing),
            MemoryRecordStore::new(),
            &config(dir.path().join("stage")),
        );
        let report = second.run(&video()).await.unwrap();
        assert!(report.records.is_empty());
        assert_eq!(
            report.track(0).unwrap().outcome,
            TrackOutcome::Skipped(SkipReason::NoOutput)
        );
        assert!(second.store().is_empty());
    }

    #[tokio::test]
    async fn failing_tracks_do_not_affect_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let p = SubtitlePipeline::new(
            FakeProber::Tracks(vec![
                TrackDescriptor::new(0, None),
                TrackDescriptor::new(1, None),
                TrackDescriptor::new(2, None),
                TrackDescriptor::new(3, None),
                TrackDescriptor::new(4, None),
            ]),
            FakeTranscoder::default()
                .with(0, Fake::Fail("Invalid data found"))
                .with(1, Fake::Hang)
                .with(2, Fake::Write(ENGLISH.as_bytes().to_vec()))
                .with(3, Fake::Write(vec![0xFF, 0xFE, 0x00, 0xD8]))
                .with(4, Fake::Write(Vec::new())),
            MemoryRecordStore::new(),
            &config(dir.path().join("stage")),
        )
        .with_track_timeout(Duration::from_millis(50));
        let report = p.run(&video()).await.unwrap();

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].track_index, 2);
        assert!(matches!(
            report.track(0).unwrap().outcome,
            TrackOutcome::ExtractionFailed(_)
        ));
        assert!(matches!(
            report.track(1).unwrap().outcome,
            TrackOutcome::ExtractionFailed(ref m) if m.contains("timed out")
        ));
        assert!(matches!(
            report.track(3).unwrap().outcome,
            TrackOutcome::DecodeFailed(_)
        ));
        assert_eq!(
            report.track(4).unwrap().outcome,
            TrackOutcome::Skipped(SkipReason::EmptyOutput)
        );
        assert_eq!(report.failures().count(), 3);
        let order: Vec<usize> = report.tracks.iter().map(|t| t.track_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn store_failure_is_per_track() {
        let dir = tempfile::tempdir().unwrap();
        let p = SubtitlePipeline::new(
            FakeProber::Tracks(vec![
                TrackDescriptor::new(0, None),
                TrackDescriptor::new(1, None),
            ]),
            FakeTranscoder::default()
                .with(0, Fake::Write(ENGLISH.as_bytes().to_vec()))
                .with(1, Fake::Write(KOREAN.as_bytes().to_vec())),
            BrokenStore,
            &config(dir.path().join("stage")),
        );
        let report = p.run(&video()).await.unwrap();
        assert!(report.records.is_empty());
        assert_eq!(report.tracks.len(), 2);
        for t in &report.tracks {
            assert!(matches!(t.outcome, TrackOutcome::PersistFailed(ref m) if m.contains("locked")));
        }
    }

    /// Records the highest number of transcodes running at once.
    #[derive(Clone, Default)]
    struct CountingTranscoder {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transcoder for CountingTranscoder {
        async fn transcode(
            &self,
            _path: &Path,
            _track_index: usize,
            output: &Path,
        ) -> Result<TranscodeOutcome, crate::error::TranscodeError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            tokio::fs::write(output, ENGLISH).await.unwrap();
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(TranscodeOutcome::Written)
        }
    }

    #[tokio::test]
    async fn transcodes_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let tr = CountingTranscoder::default();
        let peak = tr.peak.clone();
        let tracks = (0..6).map(|i| TrackDescriptor::new(i, None)).collect();
        let p = SubtitlePipeline::new(
            FakeProber::Tracks(tracks),
            tr,
            MemoryRecordStore::new(),
            &config(dir.path().join("stage")),
        );
        let report = p.run(&video()).await.unwrap();
        assert_eq!(report.records.len(), 6);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 2, "peak concurrency {peak}");
    }
}
