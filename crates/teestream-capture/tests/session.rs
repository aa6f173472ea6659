//! Session behaviour through pipe handles only; the process's own stdout and
//! stderr are never touched, so these tests run in parallel.

#![cfg(unix)]

use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use teestream_capture::{
    peek_supported, shared_destination, CaptureError, Channel, DiagnosticKind, MergeMode,
    NewlineMode, SessionState, SharedBuffer, TeeStream, TeeStreamBuilder, TextEncoding,
};

fn builder() -> TeeStreamBuilder {
    TeeStream::builder().redirect_process(false)
}

#[test]
fn test_stdout_reaches_every_destination() {
    let a = SharedBuffer::new();
    let b = SharedBuffer::new();
    let mut tee = builder()
        .destination(shared_destination(a.clone()))
        .destination(shared_destination(b.clone()))
        .start()
        .unwrap();

    tee.out().unwrap().write_str("Hello\n").unwrap();
    let report = tee.release().unwrap();

    assert_eq!(a.text(), "Hello\n");
    assert_eq!(b.text(), "Hello\n");
    assert!(report.is_clean());
    assert_eq!(report.statistics.out.bytes_read, 6);
}

#[test]
fn test_err_and_out_are_different() {
    let tee = builder().start().unwrap();

    let out = tee.handle(Channel::Out).unwrap();
    assert!(Arc::ptr_eq(&out, &tee.handle(Channel::Out).unwrap()));
    let err = tee.handle(Channel::Err).unwrap();
    assert!(Arc::ptr_eq(&err, &tee.err().unwrap()));
    assert!(!Arc::ptr_eq(&out, &err));
    assert_eq!(out.channel(), Channel::Out);
    assert_eq!(err.channel(), Channel::Err);
}

#[test]
fn test_merge_out_and_err() {
    if !peek_supported() {
        return;
    }

    let poll = Duration::from_millis(50);
    let a = SharedBuffer::new();
    let b = SharedBuffer::new();
    let mut tee = builder()
        .destination(shared_destination(a.clone()))
        .destination(shared_destination(b.clone()))
        .poll_interval(poll)
        .start()
        .unwrap();
    assert!(tee.is_merged());

    let out = tee.out().unwrap();
    let err = tee.err().unwrap();
    out.write_str("Hello\nWorld").unwrap();
    out.flush().unwrap();
    thread::sleep(poll.mul_f64(1.1));
    err.write_str("interrupting\ncow").unwrap();
    err.flush().unwrap();
    thread::sleep(poll * 2);
    tee.release().unwrap();

    assert_eq!(a.text(), "Hello\ninterrupting\ncowWorld");
    assert_eq!(b.text(), "Hello\ninterrupting\ncowWorld");
}

#[test]
fn test_out_and_err_without_merge() {
    let a = SharedBuffer::new();
    let b = SharedBuffer::new();
    let mut tee = builder()
        .destination(shared_destination(a.clone()))
        .destination(shared_destination(b.clone()))
        .merge(MergeMode::Disabled)
        .start()
        .unwrap();
    assert!(!tee.is_merged());

    tee.err().unwrap().write_str("Hello\n").unwrap();
    thread::sleep(Duration::from_millis(110));
    tee.out().unwrap().write_str("World\n").unwrap();
    tee.release().unwrap();

    assert_eq!(a.text(), "Hello\nWorld\n");
    assert_eq!(b.text(), "Hello\nWorld\n");
}

#[test]
fn test_binary_tee() {
    let a = SharedBuffer::new();
    let b = SharedBuffer::new();
    let mut tee = builder()
        .destination(shared_destination(a.clone()))
        .destination(shared_destination(b.clone()))
        .binary(true)
        .start()
        .unwrap();

    tee.out().unwrap().write_bytes(b"Hello\n").unwrap();
    tee.release().unwrap();

    assert_eq!(a.contents(), b"Hello\n");
    assert_eq!(b.contents(), b"Hello\n");
}

#[test]
fn test_decoder_and_buffer_errors() {
    let reference = "Hello, ©".as_bytes();
    let mut tee = builder().encoding(TextEncoding::Utf8).start().unwrap();

    let fd = tee.out().unwrap().try_clone_fd().unwrap();
    let mut raw = File::from(fd);
    raw.write_all(&reference[..reference.len() - 1]).unwrap();
    drop(raw);

    let report = tee.release().unwrap();
    assert_eq!(
        report.render_diagnostics(),
        "Stream handle closed with a partial line in the output buffer \
         that was not emitted to the output stream(s):\n\
         \t'Hello, '\n\
         Stream handle closed with un-decoded characters in the decoder \
         buffer that was not emitted to the output stream(s):\n\
         \tb'\\xc2'\n"
    );
}

#[test]
fn test_closed_destination_is_reported() {
    let out = SharedBuffer::new();
    let mut tee = builder()
        .destination(shared_destination(out.clone()))
        .start()
        .unwrap();

    out.close();
    tee.out().unwrap().write_str("hi\n").unwrap();
    let report = tee.release().unwrap();

    assert_eq!(
        report.render_diagnostics(),
        "Output stream closed before all output was written to it. \
         The following was left in the output buffer:\n\t'hi\\n'\n"
    );
    assert_eq!(report.diagnostics[0].kind, DiagnosticKind::DestinationClosed);
    assert_eq!(report.statistics.destination_failures, 1);
}

#[test]
fn test_closed_destination_is_dropped_after_first_refusal() {
    let closed = SharedBuffer::new();
    closed.close();
    let open = SharedBuffer::new();
    let mut tee = builder()
        .channels([Channel::Out])
        .destination(shared_destination(closed))
        .destination(shared_destination(open.clone()))
        .start()
        .unwrap();

    let out = tee.out().unwrap();
    let mut expected = String::new();
    for i in 0..2000 {
        let line = format!("line {i}\n");
        out.write_str(&line).unwrap();
        expected.push_str(&line);
    }
    let report = tee.release().unwrap();

    assert_eq!(open.text(), expected);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].kind, DiagnosticKind::DestinationClosed);
    assert_eq!(report.statistics.destination_failures, 1);
}

#[test]
fn test_per_channel_destinations() {
    let out_buf = SharedBuffer::new();
    let err_buf = SharedBuffer::new();
    let mut tee = builder()
        .channel_destination(Channel::Out, shared_destination(out_buf.clone()))
        .channel_destination(Channel::Err, shared_destination(err_buf.clone()))
        .merge(MergeMode::Disabled)
        .start()
        .unwrap();

    tee.out().unwrap().write_str("to out\n").unwrap();
    tee.err().unwrap().write_str("to err").unwrap();
    tee.release().unwrap();

    assert_eq!(out_buf.text(), "to out\n");
    assert_eq!(err_buf.text(), "to err");
}

#[test]
fn test_single_channel_session() {
    let buffer = SharedBuffer::new();
    let mut tee = builder()
        .channels([Channel::Out])
        .destination(shared_destination(buffer.clone()))
        .start()
        .unwrap();

    assert!(!tee.is_merged());
    assert!(matches!(
        tee.err(),
        Err(CaptureError::UnknownChannel(Channel::Err))
    ));

    tee.out().unwrap().write_str("only out").unwrap();
    tee.release().unwrap();
    assert_eq!(buffer.text(), "only out");
}

#[test]
fn test_latin1_and_newline_translation() {
    let buffer = SharedBuffer::new();
    let mut tee = builder()
        .destination(shared_destination(buffer.clone()))
        .encoding(TextEncoding::Latin1)
        .newline(NewlineMode::Universal)
        .start()
        .unwrap();

    tee.out().unwrap().write_bytes(b"caf\xe9\r\nnext\r").unwrap();
    tee.release().unwrap();
    assert_eq!(buffer.text(), "café\nnext\n");
}

#[test]
fn test_carriage_returns_pass_through_by_default() {
    let out = SharedBuffer::new();
    let err = SharedBuffer::new();
    let mut tee = builder()
        .channel_destination(Channel::Out, shared_destination(out.clone()))
        .channel_destination(Channel::Err, shared_destination(err.clone()))
        .merge(MergeMode::Disabled)
        .encoding(TextEncoding::Utf8)
        .start()
        .unwrap();

    let written = "progress 10%\rprogress 20%\r\ndone\n";
    tee.out().unwrap().write_str(written).unwrap();
    tee.err().unwrap().write_str("50%\r").unwrap();
    let report = tee.release().unwrap();

    assert!(report.is_clean());
    assert_eq!(out.text(), written);
    assert_eq!(err.text(), "50%\r");
}

#[test]
fn test_lifecycle_misuse() {
    let mut tee = builder().build();
    assert_eq!(tee.state(), SessionState::Idle);
    assert!(matches!(tee.out(), Err(CaptureError::NotAcquired)));
    assert!(matches!(tee.release(), Err(CaptureError::NotAcquired)));

    tee.acquire().unwrap();
    assert!(tee.state().is_active());
    assert!(matches!(tee.acquire(), Err(CaptureError::AlreadyAcquired)));

    let out = tee.out().unwrap();
    tee.release().unwrap();
    assert_eq!(tee.state(), SessionState::Released);

    let again = tee.release().unwrap();
    assert!(again.is_clean());
    assert!(matches!(tee.acquire(), Err(CaptureError::Released)));

    assert!(out.is_closed());
    assert!(matches!(out.write_str("late"), Err(CaptureError::ClosedHandle)));
    assert!(Arc::ptr_eq(&out, &tee.out().unwrap()));
}

#[test]
fn test_drop_releases_session() {
    let buffer = SharedBuffer::new();
    {
        let tee = builder()
            .destination(shared_destination(buffer.clone()))
            .start()
            .unwrap();
        tee.out().unwrap().write_str("dropped\n").unwrap();
    }
    assert_eq!(buffer.text(), "dropped\n");
}
