//! Command verb table.
//!
//! One verb per uplink frame, matched exactly (verbs are validated as
//! alphanumeric before they get here). Parsing is separated from execution
//! so the dispatcher in [`crate::mission`] stays a flat match over typed
//! verbs rather than a chain of string comparisons.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandVerb {
    Ping,
    Status,
    ListDir,
    CreateDir,
    RemoveDir,
    WriteFile,
    AppendFile,
    ReadFile,
    RenameFile,
    DeleteFile,
    TestFileIo,
    McuRestart,
    GetState,
    ForceOperational,
    GetRadStatus,
    ImageStart,
    ImageChunk,
    ImageEnd,
    ImageCancel,
    ImageStatus,
    AccelRecord,
    AccelStatus,
    AccelCancel,
    AccelList,
}

impl CommandVerb {
    pub fn parse(verb: &str) -> Option<Self> {
        match verb {
            "Ping" => Some(Self::Ping),
            "Status" => Some(Self::Status),
            "ListDir" => Some(Self::ListDir),
            "CreateDir" => Some(Self::CreateDir),
            "RemoveDir" => Some(Self::RemoveDir),
            "WriteFile" => Some(Self::WriteFile),
            "AppendFile" => Some(Self::AppendFile),
            "ReadFile" => Some(Self::ReadFile),
            "RenameFile" => Some(Self::RenameFile),
            "DeleteFile" => Some(Self::DeleteFile),
            "TestFileIO" => Some(Self::TestFileIo),
            "MCURestart" => Some(Self::McuRestart),
            "GetState" => Some(Self::GetState),
            "ForceOperational" => Some(Self::ForceOperational),
            "GetRadStatus" => Some(Self::GetRadStatus),
            "ImageStart" => Some(Self::ImageStart),
            "ImageChunk" => Some(Self::ImageChunk),
            "ImageEnd" => Some(Self::ImageEnd),
            "ImageCancel" => Some(Self::ImageCancel),
            "ImageStatus" => Some(Self::ImageStatus),
            "AccelRecord" => Some(Self::AccelRecord),
            "AccelStatus" => Some(Self::AccelStatus),
            "AccelCancel" => Some(Self::AccelCancel),
            "AccelList" => Some(Self::AccelList),
            _ => None,
        }
    }

    /// Verbs that touch the SD card and fail fast when it is absent.
    pub fn needs_filesystem(&self) -> bool {
        matches!(
            self,
            Self::ListDir
                | Self::CreateDir
                | Self::RemoveDir
                | Self::WriteFile
                | Self::AppendFile
                | Self::ReadFile
                | Self::RenameFile
                | Self::DeleteFile
                | Self::TestFileIo
                | Self::AccelList
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_verbs_parse() {
        assert_eq!(CommandVerb::parse("Ping"), Some(CommandVerb::Ping));
        assert_eq!(CommandVerb::parse("TestFileIO"), Some(CommandVerb::TestFileIo));
        assert_eq!(CommandVerb::parse("MCURestart"), Some(CommandVerb::McuRestart));
        assert_eq!(CommandVerb::parse("ImageChunk"), Some(CommandVerb::ImageChunk));
    }

    #[test]
    fn test_unknown_and_miscased_verbs_rejected() {
        assert_eq!(CommandVerb::parse("ping"), None);
        assert_eq!(CommandVerb::parse("Reboot"), None);
        assert_eq!(CommandVerb::parse(""), None);
    }

    #[test]
    fn test_filesystem_verbs_flagged() {
        assert!(CommandVerb::ListDir.needs_filesystem());
        assert!(!CommandVerb::Ping.needs_filesystem());
        assert!(!CommandVerb::ImageStart.needs_filesystem());
    }
}
