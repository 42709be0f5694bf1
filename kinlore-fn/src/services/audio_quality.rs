//! Recording quality heuristic
//!
//! Flags recordings that are too quiet, too loud, clipped, mostly silent or
//! too short, so the client can ask the narrator to record again before a
//! transcription is paid for.
//!
//! **Algorithm:**
//! 1. Single pass over mono samples: sum |x|, sum x², peak, silent and
//!    clipped sample counts
//! 2. Derive average energy (mean |x|), RMS and the two ratios
//! 3. Compare against [`QualityThresholds`] with strict inequalities
//!
//! Step 1 lives in [`QualityAccumulator`], which the decoder feeds one
//! sample at a time, so memory use does not grow with the recording length.

use axum::body::Bytes;
use kinlore_common::{Error, Result};
use serde::Serialize;

use crate::utils::decode_audio_stream;

/// Limits used to flag a recording
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityThresholds {
    /// Below this mean |x| the recording is too quiet
    pub min_average_energy: f32,
    /// Above this mean |x| the recording is too loud
    pub max_average_energy: f32,
    /// Samples with |x| below this count as silence
    pub silence_level: f32,
    /// Samples with |x| at or above this count as clipped
    pub clip_level: f32,
    /// Clipped fraction that flags the recording
    pub max_clipping_ratio: f32,
    /// Silent fraction that flags the recording
    pub max_silence_ratio: f32,
    /// Shortest acceptable recording
    pub min_duration_seconds: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_average_energy: 0.01,
            max_average_energy: 0.5,
            silence_level: 0.01,
            clip_level: 0.99,
            max_clipping_ratio: 0.01,
            max_silence_ratio: 0.8,
            min_duration_seconds: 1.0,
        }
    }
}

fn unit_range(name: &str, value: f32) -> Result<f32> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(Error::InvalidInput(format!("{} must be within 0..=1, got {}", name, value)))
    }
}

impl QualityThresholds {
    pub fn with_energy_range(mut self, min: f32, max: f32) -> Result<Self> {
        self.min_average_energy = unit_range("min_average_energy", min)?;
        self.max_average_energy = unit_range("max_average_energy", max)?;
        if min > max {
            return Err(Error::InvalidInput(format!(
                "min_average_energy ({}) exceeds max_average_energy ({})",
                min, max
            )));
        }
        Ok(self)
    }

    pub fn with_silence_level(mut self, level: f32) -> Result<Self> {
        self.silence_level = unit_range("silence_level", level)?;
        Ok(self)
    }

    pub fn with_clip_level(mut self, level: f32) -> Result<Self> {
        self.clip_level = unit_range("clip_level", level)?;
        Ok(self)
    }

    pub fn with_max_clipping_ratio(mut self, ratio: f32) -> Result<Self> {
        self.max_clipping_ratio = unit_range("max_clipping_ratio", ratio)?;
        Ok(self)
    }

    pub fn with_max_silence_ratio(mut self, ratio: f32) -> Result<Self> {
        self.max_silence_ratio = unit_range("max_silence_ratio", ratio)?;
        Ok(self)
    }

    pub fn with_min_duration(mut self, seconds: f64) -> Result<Self> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(Error::InvalidInput(format!(
                "min_duration_seconds must be non-negative, got {}",
                seconds
            )));
        }
        self.min_duration_seconds = seconds;
        Ok(self)
    }
}

/// Problem found in a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    TooQuiet,
    TooLoud,
    Clipped,
    MostlySilent,
    TooShort,
}

impl QualityIssue {
    /// Advice shown to the narrator
    pub fn hint(&self) -> &'static str {
        match self {
            QualityIssue::TooQuiet => {
                "The recording is very quiet. Try holding the microphone closer or speaking up."
            }
            QualityIssue::TooLoud => {
                "The recording is very loud. Try moving the microphone a little further away."
            }
            QualityIssue::Clipped => {
                "Parts of the recording are distorted. Try speaking a little softer or further from the microphone."
            }
            QualityIssue::MostlySilent => {
                "We could barely hear anything. Check that the right microphone is selected."
            }
            QualityIssue::TooShort => "The recording is very short. Try saying a little more.",
        }
    }
}

/// Flag plus its hint, as sent to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityFlag {
    pub issue: QualityIssue,
    pub hint: &'static str,
}

impl From<QualityIssue> for QualityFlag {
    fn from(issue: QualityIssue) -> Self {
        Self { issue, hint: issue.hint() }
    }
}

/// Analysis result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    /// Mean absolute amplitude
    pub average_energy: f32,
    pub rms: f32,
    pub peak: f32,
    pub silence_ratio: f32,
    pub clipping_ratio: f32,
    pub duration_seconds: f64,
    pub issues: Vec<QualityFlag>,
    /// True iff no issue was flagged
    pub acceptable: bool,
}

impl QualityReport {
    pub fn has_issue(&self, issue: QualityIssue) -> bool {
        self.issues.iter().any(|f| f.issue == issue)
    }
}

/// Computes [`QualityReport`]s against fixed thresholds
#[derive(Debug, Clone, Default)]
pub struct AudioQualityAnalyzer {
    thresholds: QualityThresholds,
}

impl AudioQualityAnalyzer {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Empty running statistics for this analyzer's levels
    pub fn accumulator(&self) -> QualityAccumulator {
        QualityAccumulator::new(&self.thresholds)
    }

    /// Analyze mono samples in [-1, 1]
    pub fn analyze(&self, samples: &[f32], sample_rate: u32) -> QualityReport {
        let mut acc = self.accumulator();
        for &sample in samples {
            acc.push(sample);
        }
        self.report(&acc, sample_rate)
    }

    /// Decode an uploaded recording and analyze it in one streaming pass
    ///
    /// CPU-bound; async callers run this on the blocking pool.
    pub fn analyze_encoded(&self, bytes: Bytes, extension_hint: Option<&str>) -> anyhow::Result<QualityReport> {
        let mut acc = self.accumulator();
        let stream = decode_audio_stream(bytes, extension_hint, |sample| acc.push(sample))?;
        Ok(self.report(&acc, stream.sample_rate))
    }

    /// Turn accumulated statistics into a report
    pub fn report(&self, acc: &QualityAccumulator, sample_rate: u32) -> QualityReport {
        let t = &self.thresholds;

        if acc.count == 0 || sample_rate == 0 {
            return QualityReport {
                average_energy: 0.0,
                rms: 0.0,
                peak: 0.0,
                silence_ratio: 0.0,
                clipping_ratio: 0.0,
                duration_seconds: 0.0,
                issues: vec![QualityIssue::TooShort.into(), QualityIssue::MostlySilent.into()],
                acceptable: false,
            };
        }

        let count = acc.count as f64;
        let average_energy = (acc.abs_sum / count) as f32;
        let rms = (acc.square_sum / count).sqrt() as f32;
        let silence_ratio = (acc.silent as f64 / count) as f32;
        let clipping_ratio = (acc.clipped as f64 / count) as f32;
        let duration_seconds = count / sample_rate as f64;
        let peak = acc.peak;

        let mut issues = Vec::new();
        if average_energy < t.min_average_energy {
            issues.push(QualityIssue::TooQuiet.into());
        }
        if average_energy > t.max_average_energy {
            issues.push(QualityIssue::TooLoud.into());
        }
        if clipping_ratio > t.max_clipping_ratio {
            issues.push(QualityIssue::Clipped.into());
        }
        if silence_ratio > t.max_silence_ratio {
            issues.push(QualityIssue::MostlySilent.into());
        }
        if duration_seconds < t.min_duration_seconds {
            issues.push(QualityIssue::TooShort.into());
        }

        let acceptable = issues.is_empty();
        tracing::debug!(
            average_energy,
            rms,
            peak,
            silence_ratio,
            clipping_ratio,
            duration_seconds,
            acceptable,
            "Audio quality analyzed"
        );

        QualityReport {
            average_energy,
            rms,
            peak,
            silence_ratio,
            clipping_ratio,
            duration_seconds,
            issues,
            acceptable,
        }
    }
}

/// Running sums over mono samples
#[derive(Debug, Clone)]
pub struct QualityAccumulator {
    silence_level: f32,
    clip_level: f32,
    abs_sum: f64,
    square_sum: f64,
    peak: f32,
    silent: u64,
    clipped: u64,
    count: u64,
}

impl QualityAccumulator {
    fn new(thresholds: &QualityThresholds) -> Self {
        Self {
            silence_level: thresholds.silence_level,
            clip_level: thresholds.clip_level,
            abs_sum: 0.0,
            square_sum: 0.0,
            peak: 0.0,
            silent: 0,
            clipped: 0,
            count: 0,
        }
    }

    pub fn push(&mut self, sample: f32) {
        let magnitude = sample.abs();
        self.abs_sum += magnitude as f64;
        self.square_sum += (sample as f64) * (sample as f64);
        self.peak = self.peak.max(magnitude);
        if magnitude < self.silence_level {
            self.silent += 1;
        }
        if magnitude >= self.clip_level {
            self.clipped += 1;
        }
        self.count += 1;
    }

    /// Samples seen so far
    pub fn samples(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 8000;

    fn constant(level: f32, seconds: f64) -> Vec<f32> {
        vec![level; (RATE as f64 * seconds) as usize]
    }

    fn issues(report: &QualityReport) -> Vec<QualityIssue> {
        report.issues.iter().map(|f| f.issue).collect()
    }

    #[test]
    fn test_empty_input() {
        let report = AudioQualityAnalyzer::default().analyze(&[], RATE);
        assert_eq!(issues(&report), vec![QualityIssue::TooShort, QualityIssue::MostlySilent]);
        assert_eq!(report.average_energy, 0.0);
        assert_eq!(report.duration_seconds, 0.0);
        assert!(!report.acceptable);
    }

    #[test]
    fn test_good_recording_is_acceptable() {
        // Alternating ±0.2 for 2 s
        let samples: Vec<f32> = (0..RATE * 2)
            .map(|i| if i % 2 == 0 { 0.2 } else { -0.2 })
            .collect();
        let report = AudioQualityAnalyzer::default().analyze(&samples, RATE);
        assert!(report.acceptable, "unexpected issues: {:?}", report.issues);
        assert!((report.average_energy - 0.2).abs() < 1e-6);
        assert!((report.rms - 0.2).abs() < 1e-6);
        assert_eq!(report.duration_seconds, 2.0);
    }

    #[test]
    fn test_quiet_and_silent() {
        let report = AudioQualityAnalyzer::default().analyze(&constant(0.001, 2.0), RATE);
        assert_eq!(issues(&report), vec![QualityIssue::TooQuiet, QualityIssue::MostlySilent]);
    }

    #[test]
    fn test_loud_and_clipped() {
        let report = AudioQualityAnalyzer::default().analyze(&constant(1.0, 2.0), RATE);
        assert_eq!(issues(&report), vec![QualityIssue::TooLoud, QualityIssue::Clipped]);
        assert_eq!(report.peak, 1.0);
        assert_eq!(report.clipping_ratio, 1.0);
    }

    #[test]
    fn test_too_short() {
        let report = AudioQualityAnalyzer::default().analyze(&constant(0.2, 0.5), RATE);
        assert_eq!(issues(&report), vec![QualityIssue::TooShort]);
    }

    #[test]
    fn test_boundaries_are_strict() {
        // Exactly 1 s is not too short; exactly 0.5 energy is not too loud
        let report = AudioQualityAnalyzer::default().analyze(&constant(0.5, 1.0), RATE);
        assert!(report.acceptable, "unexpected issues: {:?}", report.issues);

        // Exactly 1% clipped samples is not flagged, one more is
        let mut samples = constant(0.2, 1.0);
        let one_percent = samples.len() / 100;
        for s in samples.iter_mut().take(one_percent) {
            *s = 0.99;
        }
        let report = AudioQualityAnalyzer::default().analyze(&samples, RATE);
        assert!(!report.has_issue(QualityIssue::Clipped));

        samples[one_percent] = -0.995;
        let report = AudioQualityAnalyzer::default().analyze(&samples, RATE);
        assert!(report.has_issue(QualityIssue::Clipped));
    }

    #[test]
    fn test_threshold_setters_validate() {
        let t = QualityThresholds::default();
        assert!(t.clone().with_max_silence_ratio(1.5).is_err());
        assert!(t.clone().with_clip_level(-0.1).is_err());
        assert!(t.clone().with_energy_range(0.4, 0.2).is_err());
        assert!(t.clone().with_min_duration(-1.0).is_err());

        let relaxed = t.with_min_duration(0.0).unwrap();
        let report = AudioQualityAnalyzer::new(relaxed).analyze(&constant(0.2, 0.1), RATE);
        assert!(report.acceptable);
    }

    fn wav(sample_rate: u32, frames: &[i16]) -> Bytes {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in frames {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        Bytes::from(cursor.into_inner())
    }

    #[test]
    fn test_streaming_matches_slice_analysis() {
        let frames: Vec<i16> = (0..RATE * 2)
            .map(|i| if i % 3 == 0 { 8000 } else { -4000 })
            .collect();
        let samples: Vec<f32> = frames.iter().map(|&s| s as f32 / 32768.0).collect();

        let analyzer = AudioQualityAnalyzer::default();
        let streamed = analyzer.analyze_encoded(wav(RATE, &frames), Some("wav")).unwrap();
        let sliced = analyzer.analyze(&samples, RATE);

        assert_eq!(streamed.duration_seconds, sliced.duration_seconds);
        assert!((streamed.average_energy - sliced.average_energy).abs() < 1e-4);
        assert!((streamed.rms - sliced.rms).abs() < 1e-4);
        assert_eq!(streamed.acceptable, sliced.acceptable);
    }

    #[test]
    fn test_accumulator_counts_without_storing() {
        let analyzer = AudioQualityAnalyzer::default();
        let mut acc = analyzer.accumulator();
        // Ten minutes at 8 kHz pass through a fixed-size accumulator
        for i in 0..(RATE as u64 * 600) {
            acc.push(if i % 2 == 0 { 0.2 } else { -0.2 });
        }
        assert_eq!(acc.samples(), RATE as u64 * 600);

        let report = analyzer.report(&acc, RATE);
        assert_eq!(report.duration_seconds, 600.0);
        assert!(report.acceptable, "unexpected issues: {:?}", report.issues);
    }

    #[test]
    fn test_undecodable_upload_is_an_error() {
        let result = AudioQualityAnalyzer::default()
            .analyze_encoded(Bytes::from_static(b"not audio at all"), Some("mp3"));
        assert!(result.is_err());
    }

    #[test]
    fn test_every_issue_has_a_hint() {
        for issue in [
            QualityIssue::TooQuiet,
            QualityIssue::TooLoud,
            QualityIssue::Clipped,
            QualityIssue::MostlySilent,
            QualityIssue::TooShort,
        ] {
            assert!(!issue.hint().is_empty());
        }
    }
}
