//! End-to-end tests of a running card
//!
//! These drive the card the way a host driver and a MIDI cable would: bytes
//! go in through the host PIU or the MIDI IN wire and come back out through
//! the host PIU, the MIDI OUT sink or the audio output.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use music_feature_card::card::{Card, CardConfig, HostLink, Unconnected};
use music_feature_card::export::{render_frames, render_to_wav, ExportConfig};
use music_feature_card::sysex::{frame, parse_frame, Encoding};
use music_feature_card::transport::{BufferFlags, MidiInError};

const WAIT: Duration = Duration::from_secs(2);

const ACK: [u8; 7] = [0xF0, 0x43, 0x75, 0x00, 0x60, 0x00, 0xF7];
const CANCEL: [u8; 7] = [0xF0, 0x43, 0x75, 0x00, 0x60, 0x02, 0xF7];

/// `F0 43 75 00 <body> F7`
fn node_cmd(body: &[u8]) -> Vec<u8> {
    let mut v = vec![0xF0, 0x43, 0x75, 0x00];
    v.extend_from_slice(body);
    v.push(0xF7);
    v
}

/// Card with keep-alive off so MIDI OUT only carries what the test sends.
fn quiet_config() -> CardConfig {
    CardConfig {
        keep_alive_ms: 0,
        ..CardConfig::default()
    }
}

fn peak(samples: &[i16]) -> i32 {
    samples.iter().map(|s| (*s as i32).abs()).max().unwrap_or(0)
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn test_identification_dump() {
    let card = Card::start(quiet_config()).unwrap();
    let link = HostLink::new(&card);

    link.send(&node_cmd(&[0x20, 0x03, 0x00]), WAIT).unwrap();
    let reply = link.receive_sysex(WAIT).unwrap();

    assert_eq!(reply[..7], [0xF0, 0x43, 0x75, 0x00, 0x21, 0x03, 0x00]);
    let (id, rest) = parse_frame(&reply[7..], Encoding::TypeB).unwrap();
    assert_eq!(id, b"IBM MUSIC FEATURE CARD 1.00");
    assert_eq!(rest, [0xF7]);
}

#[test]
fn test_thru_mode_forwards_midi_in_to_host() {
    let card = Card::start(quiet_config()).unwrap();
    let link = HostLink::new(&card);

    link.send(&node_cmd(&[0x40, 0x01]), WAIT).unwrap();
    assert_eq!(link.receive_sysex(WAIT).unwrap(), ACK);

    let wire = [0x90, 0x3C, 0x40, 0xF8, 0x80, 0x3C, 0x00];
    for b in wire {
        card.midi_in(b);
    }
    let mut got = Vec::new();
    while got.len() < wire.len() {
        got.push(link.receive(WAIT).unwrap());
    }
    assert_eq!(got, wire, "THRU forwards bytes verbatim");
}

#[test]
fn test_protected_store_is_cancelled() {
    let card = Card::start(quiet_config()).unwrap();
    let link = HostLink::new(&card);

    let dump_bank_0 = || {
        link.send(&node_cmd(&[0x20, 0x02, 0x00]), WAIT).unwrap();
        link.receive_sysex(WAIT).unwrap()
    };
    let before = dump_bank_0();

    // memory protect on, then try to overwrite voice 5 of bank 0
    link.send(&node_cmd(&[0x10, 0x01, 0x01]), WAIT).unwrap();
    let mut cmd = vec![0x32, 0x00, 0x05];
    cmd.extend(frame(&[0x11; 64], Encoding::TypeA).unwrap());
    link.send(&node_cmd(&cmd), WAIT).unwrap();
    assert_eq!(link.receive_sysex(WAIT).unwrap(), CANCEL);

    assert_eq!(dump_bank_0(), before, "bank must be left untouched");
}

#[test]
fn test_unprotected_voice_store_is_acked() {
    let card = Card::start(quiet_config()).unwrap();
    let link = HostLink::new(&card);

    link.send(&node_cmd(&[0x10, 0x01, 0x00]), WAIT).unwrap();
    link.send(&node_cmd(&[0x20, 0x02, 0x01]), WAIT).unwrap();
    let dump = link.receive_sysex(WAIT).unwrap();
    let (bank, _) = parse_frame(&dump[7..], Encoding::TypeA).unwrap();

    // voice 0 of the bank, renamed
    let voice_at = 0x20;
    let mut voice = bank[voice_at..voice_at + 64].to_vec();
    voice[0] = b'X';
    let mut cmd = vec![0x32, 0x01, 0x00];
    cmd.extend(frame(&voice, Encoding::TypeA).unwrap());
    link.send(&node_cmd(&cmd), WAIT).unwrap();
    assert_eq!(link.receive_sysex(WAIT).unwrap(), ACK);
}

#[test]
fn test_note_on_produces_audio() {
    let card = Card::start(quiet_config()).unwrap();
    let link = HostLink::new(&card);

    let silent = render_frames(&card, 2048, |_| {});
    assert!(peak(&silent) < 64, "idle card is silent");

    link.send(&[0x90, 0x3C, 0x64], WAIT).unwrap();
    let mut loudest = 0;
    let deadline = Instant::now() + WAIT;
    while loudest < 64 && Instant::now() < deadline {
        loudest = loudest.max(peak(&render_frames(&card, 4096, |_| {})));
    }
    assert!(loudest >= 64, "note should be audible, peak {loudest}");
}

#[test]
fn test_fm_timer_ticks_reach_the_firmware() {
    let card = Card::start(quiet_config()).unwrap();
    render_frames(&card, 44_100 / 2, |_| {});
    assert!(wait_until(|| card.ticks() > 0));
}

#[test]
fn test_flow_path_routes_midi_in_to_midi_out() {
    let sink = Arc::new(Mutex::new(Vec::<u8>::new()));
    let card = Card::start_with(quiet_config(), Arc::new(Unconnected), sink.clone()).unwrap();
    let link = HostLink::new(&card);

    // path 1 = MIDI IN -> MIDI OUT, all categories
    link.send(&node_cmd(&[0x41, 0x01, 0x0F]), WAIT).unwrap();
    // give the firmware a moment to apply the path
    thread::sleep(Duration::from_millis(50));

    for b in [0x91, 0x40, 0x50] {
        card.midi_in(b);
    }
    assert!(wait_until(|| sink.lock().len() >= 3));
    assert_eq!(sink.lock()[..], [0x91, 0x40, 0x50]);
}

#[test]
fn test_keep_alive_on_idle_midi_out() {
    let sink = Arc::new(Mutex::new(Vec::<u8>::new()));
    let config = CardConfig {
        keep_alive_ms: 50,
        ..CardConfig::default()
    };
    let card = Card::start_with(config, Arc::new(Unconnected), sink.clone()).unwrap();
    assert!(wait_until(|| sink.lock().contains(&0xFE)));
    drop(card);
}

#[test]
fn test_framing_error_is_reported_to_host() {
    let card = Card::start(quiet_config()).unwrap();
    let link = HostLink::new(&card);

    card.midi_in_error(MidiInError::Framing);
    let report = link.receive_sysex(WAIT).unwrap();
    assert_eq!(report, [0xF0, 0x43, 0x75, 0x00, 0x7E, 0x01, 0xF7]);
    assert!(card.midi_in_flags().contains(BufferFlags::READ_ERROR));
}

#[test]
fn test_sysex_timeout_is_reported_to_host() {
    let config = CardConfig {
        sysex_timeout_ms: 50,
        ..quiet_config()
    };
    let card = Card::start(config).unwrap();
    let link = HostLink::new(&card);

    link.send(&[0xF0, 0x43, 0x75, 0x00], WAIT).unwrap();
    let report = link.receive_sysex(WAIT).unwrap();
    assert_eq!(report, [0xF0, 0x43, 0x75, 0x00, 0x7E, 0x07, 0xF7]);
}

#[test]
fn test_timer_counter_raises_host_interrupt() {
    let line = Arc::new(AtomicBool::new(false));
    let card = Card::start_with(quiet_config(), line.clone(), Arc::new(Unconnected)).unwrap();
    let base = card.config().base_port;

    card.io_write(base + 0x04, 0x31);
    card.io_write(base + 0x0B, 0x34);
    card.io_write(base + 0x08, 100);
    card.io_write(base + 0x08, 0);
    render_frames(&card, 256, |_| {});

    assert!(line.load(Ordering::SeqCst));
    assert!(card.host_irq_line());
}

#[test]
fn test_render_to_wav_writes_stereo_file() {
    let card = Card::start(quiet_config()).unwrap();
    let path = std::env::temp_dir().join(format!("mfc-test-{}.wav", std::process::id()));

    render_to_wav(&card, 1000, &path, ExportConfig::with_sample_rate(44_100)).unwrap();

    let reader = hound::WavReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, 44_100);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(reader.len(), 2000);
    std::fs::remove_file(&path).ok();
}
