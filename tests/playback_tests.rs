//! Audio pipeline tests through host-driven backends

use std::sync::Arc;

use parking_lot::Mutex;

use s2s_stream::core::audio::pcm::{decode_base64_pcm16, decode_pcm16_le};
use s2s_stream::core::audio::{
    AudioCapture, AudioPlayer, DEFAULT_INITIAL_BUFFER_LENGTH, ExpandableBuffer, FRAME_SAMPLES,
    PulledOutput, PushedInput,
};

const QUANTUM: usize = 512;

fn tone(len: usize) -> Vec<f32> {
    (0..len).map(|i| ((i % 64) as f32 - 32.0) / 64.0).collect()
}

fn default_player() -> (AudioPlayer, PulledOutput) {
    let output = PulledOutput::new();
    let mut player = AudioPlayer::new(Box::new(output.clone()));
    player.start().unwrap();
    (player, output)
}

// =============================================================================
// Playback
// =============================================================================

#[test]
fn test_half_threshold_stays_silent() {
    let (player, output) = default_player();
    player.play_audio(&tone(12_000));

    let mut quantum = [1.0f32; QUANTUM];
    assert!(output.pull(&mut quantum));
    assert!(quantum.iter().all(|s| *s == 0.0));
    assert_eq!(player.get_volume(), 0.0);
}

#[test]
fn test_one_second_of_audio_drains_then_regates() {
    let (player, output) = default_player();
    let audio = tone(DEFAULT_INITIAL_BUFFER_LENGTH);
    player.play_audio(&audio);

    let full_reads = DEFAULT_INITIAL_BUFFER_LENGTH / QUANTUM;
    let mut quantum = [0.0f32; QUANTUM];
    for n in 0..full_reads {
        output.pull(&mut quantum);
        assert_eq!(&quantum[..], &audio[n * QUANTUM..(n + 1) * QUANTUM], "read {n}");
    }

    // The 47th read carries the remainder and pads the rest
    let remainder = DEFAULT_INITIAL_BUFFER_LENGTH - full_reads * QUANTUM;
    output.pull(&mut quantum);
    assert_eq!(&quantum[..remainder], &audio[full_reads * QUANTUM..]);
    assert!(quantum[remainder..].iter().all(|s| *s == 0.0));

    // Gate re-armed: a short trickle stays silent
    player.play_audio(&tone(QUANTUM));
    output.pull(&mut quantum);
    assert!(quantum.iter().all(|s| *s == 0.0));
}

#[test]
fn test_barge_in_mid_playback() {
    let (player, output) = default_player();
    player.play_audio(&tone(DEFAULT_INITIAL_BUFFER_LENGTH * 2));

    let mut quantum = [0.0f32; QUANTUM];
    output.pull(&mut quantum);
    assert!(quantum.iter().any(|s| *s != 0.0));

    player.barge_in();
    output.pull(&mut quantum);
    assert!(quantum.iter().all(|s| *s == 0.0));
}

#[test]
fn test_listener_receives_exact_device_samples() {
    let output = PulledOutput::new();
    let mut player = AudioPlayer::with_settings(Box::new(output.clone()), 24_000, 4);
    let played = Arc::new(Mutex::new(Vec::new()));
    let sink = played.clone();
    player.on_audio_played(Arc::new(move |samples: &[f32]| {
        sink.lock().extend_from_slice(samples);
    }));
    player.start().unwrap();

    player.play_audio(&[0.5, -0.5, 0.25, -0.25, 0.125]);
    let mut quantum = [0.0f32; 8];
    output.pull(&mut quantum);

    assert_eq!(*played.lock(), quantum.to_vec());
    assert_eq!(&quantum[..5], &[0.5, -0.5, 0.25, -0.25, 0.125]);
    assert_eq!(player.get_samples().unwrap(), quantum.to_vec());
}

#[test]
fn test_bursty_writes_keep_capacity_bounded() {
    let mut buffer = ExpandableBuffer::new(2048);
    let mut quantum = [0.0f32; QUANTUM];
    let mut high_water = 0;

    for burst in 0..200 {
        let size = if burst % 10 == 0 { 4096 } else { 300 };
        buffer.write(&tone(size));
        high_water = high_water.max(buffer.pending());
        buffer.read(&mut quantum);
        buffer.read(&mut quantum);
    }

    assert!(buffer.capacity() <= (high_water * 2).max(24_000));
}

// =============================================================================
// Capture
// =============================================================================

#[tokio::test]
async fn test_capture_frames_round_trip_through_pcm() {
    let input = PushedInput::new();
    let mut capture = AudioCapture::new(Box::new(input.clone()));
    let mut frames = capture.start().unwrap();

    let samples = tone(FRAME_SAMPLES * 2 + 100);
    assert!(input.push(&samples));

    let first = frames.recv().await.unwrap();
    let second = frames.recv().await.unwrap();
    assert_eq!(first.sample_count(), FRAME_SAMPLES);
    assert_eq!(second.sample_count(), FRAME_SAMPLES);
    assert!(frames.try_recv().is_err());

    let decoded = decode_pcm16_le(&first.pcm);
    for (got, want) in decoded.iter().zip(&samples[..FRAME_SAMPLES]) {
        assert!((got - want).abs() < 1.0 / 16_000.0);
    }
    assert_eq!(decode_base64_pcm16(&second.base64).unwrap(), decode_pcm16_le(&second.pcm));

    capture.stop();
    assert!(!capture.is_active());
    assert!(!input.push(&samples));
    assert!(frames.recv().await.is_none());
}
