//! Classification over real escape streams: feed recorded byte sequences
//! through the emulator and check what the classifier makes of the rendered
//! screen.

use piloty_core::{
    Emulator, PromptDetector, ScreenObservation, SessionStatus, StateClassifier,
};

fn classify(em: &Emulator, saw_output: bool) -> SessionStatus {
    let lines = em.visible_lines();
    let prompt = PromptDetector::new().classify(&lines);
    let obs = ScreenObservation {
        lines: &lines,
        alt_screen: em.alt_screen(),
        prompt,
        saw_output,
    };
    StateClassifier::new().classify(&obs, "").status
}

#[test]
fn shell_prompt_stream_reads_ready() {
    let mut em = Emulator::new(24, 80, 100);
    em.feed(b"\x1b[?2004hbash-5.2$ echo hello\r\nhello\r\nbash-5.2$ ");
    assert_eq!(classify(&em, false), SessionStatus::Ready);
}

#[test]
fn pager_stream_reads_pager() {
    let mut em = Emulator::new(24, 80, 100);
    // less: enter the alternate screen, draw content, park the `:` prompt on
    // the bottom row.
    em.feed(b"\x1b[?1049h\x1b[H\x1b[2J");
    for i in 0..23 {
        em.feed(format!("y{i}\r\n").as_bytes());
    }
    em.feed(b":");
    assert_eq!(classify(&em, false), SessionStatus::Pager);

    // q restores the main screen with its shell prompt.
    em.feed(b"\x1b[?1049lbash-5.2$ ");
    assert_eq!(classify(&em, false), SessionStatus::Ready);
}

#[test]
fn pager_end_marker_reads_pager() {
    let mut em = Emulator::new(24, 80, 100);
    em.feed(b"\x1b[?1049h\x1b[H\x1b[2Jlast page of text\r\n\x1b[7m(END)\x1b[0m");
    assert_eq!(classify(&em, false), SessionStatus::Pager);
}

#[test]
fn editor_stream_reads_editor() {
    let mut em = Emulator::new(24, 80, 100);
    em.feed(b"\x1b[?1049h\x1b[H\x1b[2J~\r\n~\r\n~\r\n");
    em.feed(b"\x1b[24;1H-- INSERT --");
    assert_eq!(classify(&em, false), SessionStatus::Editor);
}

#[test]
fn python_banner_stream_reads_repl() {
    let mut em = Emulator::new(24, 80, 100);
    em.feed(b"bash-5.2$ python3\r\nPython 3.12.0 (main) [GCC 13] on linux\r\n>>> ");
    assert_eq!(classify(&em, false), SessionStatus::Repl);
}

#[test]
fn sudo_password_stream_reads_password() {
    let mut em = Emulator::new(24, 80, 100);
    em.feed(b"bash-5.2$ sudo -S true\r\n[sudo] password for alice: ");
    assert_eq!(classify(&em, false), SessionStatus::Password);
}

#[test]
fn ssh_fingerprint_stream_reads_confirm() {
    let mut em = Emulator::new(24, 80, 100);
    em.feed(
        b"The authenticity of host 'example (10.0.0.5)' can't be established.\r\n\
          Are you sure you want to continue connecting (yes/no/[fingerprint])? ",
    );
    assert_eq!(classify(&em, false), SessionStatus::Confirm);
}

#[test]
fn traceback_stream_reads_error() {
    let mut em = Emulator::new(24, 80, 100);
    em.feed(
        b">>> 1/0\r\nTraceback (most recent call last):\r\n\
          \x20 File \"<stdin>\", line 1, in <module>\r\n\
          ZeroDivisionError: division by zero\r\n",
    );
    assert_eq!(classify(&em, true), SessionStatus::Error);
}

#[test]
fn mid_command_output_reads_running() {
    let mut em = Emulator::new(24, 80, 100);
    em.feed(b"bash-5.2$ make\r\ncompiling module one...\r\ncompiling module two...\r\n");
    assert_eq!(classify(&em, true), SessionStatus::Running);
}
