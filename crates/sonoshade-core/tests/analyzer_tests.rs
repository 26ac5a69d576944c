use parking_lot::Mutex;
use sonoshade_core::audio::{AnalyzerConfig, AudioError, AudioSource, PushSource, SampleStream};
use sonoshade_core::{AudioFeatureFrame, MagnitudeScale, SpectrumAnalyzer};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SAMPLE_RATE: u32 = 48_000;

fn test_config() -> AnalyzerConfig {
    AnalyzerConfig {
        fft_size: 512,
        smoothing: 0.0,
        scale: MagnitudeScale::Linear,
        analysis_interval_ms: 2,
        ..Default::default()
    }
}

fn create_test_samples(count: usize) -> Vec<f32> {
    (0..count).map(|i| (i as f32 * 0.1).sin()).collect()
}

fn wait_for_condition<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

struct BrokenSource;

impl AudioSource for BrokenSource {
    fn name(&self) -> String {
        "broken".into()
    }

    fn open(self: Box<Self>) -> Result<Box<dyn SampleStream>, AudioError> {
        Err(AudioError::SourceUnavailable("permission denied".into()))
    }
}

#[test]
fn test_initial_frame_is_silent() {
    let analyzer = SpectrumAnalyzer::new(test_config());
    assert_eq!(analyzer.latest_frame(), AudioFeatureFrame::silent());
    assert!(!analyzer.is_attached());
    assert_eq!(analyzer.source_name(), None);
}

#[test]
fn test_frames_follow_pushed_audio() {
    let analyzer = SpectrumAnalyzer::new(test_config());
    let (source, sender) = PushSource::new(SAMPLE_RATE);
    analyzer.attach(Box::new(source.with_name("test tone"))).unwrap();
    assert!(analyzer.is_attached());
    assert_eq!(analyzer.source_name().as_deref(), Some("test tone"));

    sender.send(&create_test_samples(2048));
    assert!(wait_for_condition(Duration::from_secs(2), || {
        analyzer.latest_frame().volume > 0.0
    }));

    // Newer audio produces newer frames
    let first = analyzer.latest_frame().sequence;
    sender.send(&create_test_samples(2048));
    assert!(wait_for_condition(Duration::from_secs(2), || {
        analyzer.latest_frame().sequence > first
    }));

    analyzer.detach();
}

#[test]
fn test_subscribers_see_frames_in_order() {
    let analyzer = SpectrumAnalyzer::new(test_config());
    let seen_a = Arc::new(Mutex::new(Vec::new()));
    let seen_b = Arc::new(Mutex::new(Vec::new()));

    let a = seen_a.clone();
    let _sub_a = analyzer.subscribe(move |frame| a.lock().push(frame.sequence));
    let b = seen_b.clone();
    let sub_b = analyzer.subscribe(move |frame| b.lock().push(frame.sequence));

    let (source, sender) = PushSource::new(SAMPLE_RATE);
    analyzer.attach(Box::new(source)).unwrap();
    for _ in 0..8 {
        sender.send(&create_test_samples(512));
        thread::sleep(Duration::from_millis(3));
    }

    assert!(wait_for_condition(Duration::from_secs(2), || seen_a.lock().len() >= 3));
    sub_b.unsubscribe();
    let b_len = seen_b.lock().len();

    sender.send(&create_test_samples(2048));
    let a_len = seen_a.lock().len();
    assert!(wait_for_condition(Duration::from_secs(2), || seen_a.lock().len() > a_len));
    analyzer.detach();

    let a = seen_a.lock().clone();
    assert!(a.windows(2).all(|w| w[0] < w[1]), "out of order: {:?}", a);
    assert_eq!(seen_b.lock().len(), b_len);
    assert_eq!(*a.last().unwrap(), analyzer.latest_frame().sequence);
}

#[test]
fn test_attach_failure_leaves_detached() {
    let analyzer = SpectrumAnalyzer::new(test_config());
    let result = analyzer.attach(Box::new(BrokenSource));
    assert!(matches!(result, Err(AudioError::SourceUnavailable(_))));
    assert!(!analyzer.is_attached());
    assert_eq!(analyzer.latest_frame(), AudioFeatureFrame::silent());
}

#[test]
fn test_detach_is_idempotent_and_freezes_frame() {
    let analyzer = SpectrumAnalyzer::new(test_config());
    analyzer.detach();

    let (source, sender) = PushSource::new(SAMPLE_RATE);
    analyzer.attach(Box::new(source)).unwrap();
    sender.send(&create_test_samples(2048));
    assert!(wait_for_condition(Duration::from_secs(2), || {
        analyzer.latest_frame().sequence > 0
    }));

    analyzer.detach();
    analyzer.detach();
    assert!(!analyzer.is_attached());

    let frozen = analyzer.latest_frame();
    // The stream was released with the thread
    assert!(!sender.send(&create_test_samples(2048)));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(analyzer.latest_frame(), frozen);
}

#[test]
fn test_reattach_continues_sequence() {
    let analyzer = SpectrumAnalyzer::new(test_config());

    let (first, first_sender) = PushSource::new(SAMPLE_RATE);
    analyzer.attach(Box::new(first)).unwrap();
    assert!(first_sender.send(&create_test_samples(2048)));
    assert!(wait_for_condition(Duration::from_secs(2), || {
        analyzer.latest_frame().sequence > 0
    }));

    let (second, second_sender) = PushSource::new(SAMPLE_RATE);
    analyzer.attach(Box::new(second)).unwrap();
    // The first source was released by the re-attach
    assert!(!first_sender.send(&create_test_samples(64)));

    let before = analyzer.latest_frame().sequence;
    assert!(second_sender.send(&create_test_samples(2048)));
    assert!(wait_for_condition(Duration::from_secs(2), || {
        analyzer.latest_frame().sequence > before
    }));
}

#[test]
fn test_concurrent_readers_never_block() {
    let analyzer = Arc::new(SpectrumAnalyzer::new(test_config()));
    let (source, sender) = PushSource::new(SAMPLE_RATE);
    analyzer.attach(Box::new(source)).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let analyzer = analyzer.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    let frame = analyzer.latest_frame();
                    assert!(frame.volume >= 0.0 && frame.volume <= 1.0);
                }
            })
        })
        .collect();

    for _ in 0..10 {
        sender.send(&create_test_samples(1024));
    }
    for reader in readers {
        reader.join().unwrap();
    }
}
