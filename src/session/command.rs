//! Single-character operator commands.

/// One operator keystroke, parsed case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartRecording,
    StopRecording,
    List,
    PlayLatest,
    StopPlayback,
    Tone,
    DeleteAll,
    /// Transcribe the latest recording and answer it.
    Respond,
    /// Play the most recent synthesized reply again.
    ReplayReply,
    Help,
}

impl Command {
    /// Parse a single input byte.
    ///
    /// Returns `None` for unknown keys and whitespace.
    ///
    /// ```
    /// use talkbox::session::Command;
    ///
    /// assert_eq!(Command::from_byte(b'S'), Some(Command::StartRecording));
    /// assert_eq!(Command::from_byte(b'?'), Some(Command::Help));
    /// assert_eq!(Command::from_byte(b'z'), None);
    /// ```
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte.to_ascii_lowercase() {
            b's' => Some(Command::StartRecording),
            b'x' => Some(Command::StopRecording),
            b'l' => Some(Command::List),
            b'p' => Some(Command::PlayLatest),
            b'q' => Some(Command::StopPlayback),
            b't' => Some(Command::Tone),
            b'd' => Some(Command::DeleteAll),
            b'r' => Some(Command::Respond),
            b'v' => Some(Command::ReplayReply),
            b'h' | b'?' => Some(Command::Help),
            _ => None,
        }
    }

    /// Key that triggers this command.
    pub fn key(&self) -> char {
        match self {
            Command::StartRecording => 's',
            Command::StopRecording => 'x',
            Command::List => 'l',
            Command::PlayLatest => 'p',
            Command::StopPlayback => 'q',
            Command::Tone => 't',
            Command::DeleteAll => 'd',
            Command::Respond => 'r',
            Command::ReplayReply => 'v',
            Command::Help => 'h',
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Command::StartRecording => "start recording",
            Command::StopRecording => "stop recording",
            Command::List => "list stored files",
            Command::PlayLatest => "play the latest recording",
            Command::StopPlayback => "stop playback",
            Command::Tone => "play a test tone",
            Command::DeleteAll => "delete all audio files",
            Command::Respond => "transcribe the latest recording and reply",
            Command::ReplayReply => "replay the last spoken reply",
            Command::Help => "show this help",
        }
    }

    pub const ALL: [Command; 10] = [
        Command::StartRecording,
        Command::StopRecording,
        Command::List,
        Command::PlayLatest,
        Command::StopPlayback,
        Command::Tone,
        Command::DeleteAll,
        Command::Respond,
        Command::ReplayReply,
        Command::Help,
    ];

    /// Help block printed at startup and on `h`.
    pub fn help_text() -> String {
        let mut text = String::from("Commands:\n");
        for command in Command::ALL {
            text.push_str(&format!("  {} - {}\n", command.key(), command.description()));
        }
        text
    }
}
