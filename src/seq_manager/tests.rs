use super::*;

#[test]
fn first_sync_starts_right_after_zero() {
    let mut seq_manager = SeqManager::<u16>::new();

    seq_manager.sync(1000);

    assert_eq!(seq_manager.input(1000), 1);
    assert_eq!(seq_manager.input(1001), 2);
    assert_eq!(seq_manager.input(1002), 3);
    assert_eq!(seq_manager.max_output(), 3);
}

#[test]
fn input_without_sync_self_seeds() {
    let mut seq_manager = SeqManager::<u16>::new();

    assert_eq!(seq_manager.input(500), 1);
    assert_eq!(seq_manager.input(501), 2);
}

#[test]
fn out_of_order_inputs_preserve_relative_order() {
    let mut seq_manager = SeqManager::<u16>::new();

    seq_manager.sync(100);

    assert_eq!(seq_manager.input(100), 1);
    assert_eq!(seq_manager.input(102), 3);
    // Late arrival maps to the hole it left.
    assert_eq!(seq_manager.input(101), 2);
    assert_eq!(seq_manager.max_output(), 3);
}

#[test]
fn dropped_inputs_leave_no_gap() {
    let mut seq_manager = SeqManager::<u16>::new();

    seq_manager.sync(0);

    assert_eq!(seq_manager.input(0), 1);
    seq_manager.drop(1);
    seq_manager.drop(2);
    assert_eq!(seq_manager.input(3), 2);
    assert_eq!(seq_manager.input(4), 3);
}

#[test]
fn wrap_around_is_forward() {
    let mut seq_manager = SeqManager::<u16>::new();

    seq_manager.sync(65534);

    assert_eq!(seq_manager.input(65534), 1);
    assert_eq!(seq_manager.input(65535), 2);
    assert_eq!(seq_manager.input(0), 3);
    assert_eq!(seq_manager.input(1), 4);
    assert_eq!(seq_manager.max_output(), 4);
}

#[test]
fn output_wrap_updates_max_output() {
    let mut seq_manager = SeqManager::<u16>::new();

    seq_manager.sync(10);
    // Walk the output close to the wrap point.
    seq_manager.offset(65530);

    let out1 = seq_manager.input(10);
    let out2 = seq_manager.input(11);
    let out3 = seq_manager.input(12);

    assert_eq!(out2, out1.wrapping_add(1));
    assert_eq!(out3, out2.wrapping_add(1));
    assert_eq!(seq_manager.max_output(), out3);
}

#[test]
fn resync_continues_after_max_output() {
    let mut seq_manager = SeqManager::<u16>::new();

    seq_manager.sync(1000);
    assert_eq!(seq_manager.input(1000), 1);
    assert_eq!(seq_manager.input(1001), 2);

    // Producer restarted from an arbitrary sequence number.
    seq_manager.sync(30000);
    assert_eq!(seq_manager.input(30000), 3);
    assert_eq!(seq_manager.input(30001), 4);
}

#[test]
fn timestamp_offset_jumps_forward() {
    let mut ts_manager = SeqManager::<u32>::new();

    ts_manager.sync(90000);
    assert_eq!(ts_manager.input(90000), 1);

    ts_manager.sync(180000);
    ts_manager.offset(90000);
    // 2 + 90000 for the injected gap.
    assert_eq!(ts_manager.input(180000), 90002);
    assert_eq!(ts_manager.input(180003), 90005);
}

#[test]
fn drop_counter_resets_on_sync() {
    let mut seq_manager = SeqManager::<u16>::new();

    seq_manager.sync(0);
    assert_eq!(seq_manager.input(0), 1);
    seq_manager.drop(1);
    assert_eq!(seq_manager.input(2), 2);

    seq_manager.sync(100);
    assert_eq!(seq_manager.input(100), 3);
}
