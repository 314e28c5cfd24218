use super::*;
use crate::rtp_parameters::{MimeType, MimeTypeAudio};

fn params() -> RtpStreamParams {
    RtpStreamParams {
        ssrc: 0xAAAA,
        payload_type: 100,
        mime_type: MimeType::Audio(MimeTypeAudio::Opus),
        clock_rate: 48000,
        cname: "test".to_string(),
        use_nack: false,
        use_pli: false,
        use_fir: false,
        use_in_band_fec: false,
        rtx_ssrc: None,
        rtx_payload_type: None,
    }
}

#[test]
fn update_seq_accepts_in_order_and_counts_cycles() {
    let mut stream = RtpStream::new(params());

    assert!(stream.update_seq(65533));
    assert!(stream.update_seq(65534));
    assert!(stream.update_seq(65535));
    assert!(stream.update_seq(0));
    assert!(stream.update_seq(1));

    assert_eq!(stream.cycles, RTP_SEQ_MOD);
    assert_eq!(stream.expected_packets(), 5);
}

#[test]
fn update_seq_rejects_single_large_jump() {
    let mut stream = RtpStream::new(params());

    assert!(stream.update_seq(100));
    assert!(stream.update_seq(101));
    // Jump far beyond the dropout window.
    assert!(!stream.update_seq(40000));
    // A second sequential packet validates the restart.
    assert!(stream.update_seq(40001));
    assert_eq!(stream.base_seq, 40001);
}

#[test]
fn rate_calculator_window() {
    let mut calculator = RateCalculator::default();

    calculator.update(125, 1000);
    calculator.update(125, 1500);

    // 250 bytes in the window -> 2000 bits per second.
    assert_eq!(calculator.get_rate(1999), 2000);
    // First packet slid out.
    assert_eq!(calculator.get_rate(2100), 1000);
    // Everything slid out.
    assert_eq!(calculator.get_rate(3000), 0);

    assert_eq!(calculator.packet_count(), 2);
    assert_eq!(calculator.byte_count(), 250);
}

#[test]
fn monitor_first_observation_is_unsmoothed() {
    let mut monitor = RtpMonitor::default();

    // 25% loss -> 7.49.
    assert_eq!(monitor.update(64), Some(7));
    assert_eq!(monitor.score(), 7);
}

#[test]
fn monitor_smooths_history_and_fires_on_integer_change() {
    let mut monitor = RtpMonitor::default();

    assert_eq!(monitor.update(0), None); // still 10
    assert_eq!(monitor.update(64), Some(9)); // 0.75*10 + 0.25*7.49
    assert_eq!(monitor.update(64), Some(8)); // 8.90
    assert_eq!(monitor.update(64), None); // 8.55
    assert_eq!(monitor.update(0), None); // 8.91
}

#[test]
fn ntp_round_numbers() {
    let ntp = ms_to_ntp(1_500);
    assert_eq!(ntp >> 32, 2_208_988_800 + 1);
    assert_eq!(ntp & 0xFFFF_FFFF, (500u64 << 32) / 1000);

    assert_eq!(compact_ntp(ntp), ((ntp >> 16) & 0xFFFF_FFFF) as u32);
}
