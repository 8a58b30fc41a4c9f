/// Glyphs from the nerd font set used to mark outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NerdFont {
    Check,
    CrossCircle,
    Warning,
    HardDrive,
}

impl NerdFont {
    pub const fn unicode(&self) -> char {
        match self {
            Self::Check => '\u{f00c}',       // fa-check
            Self::CrossCircle => '\u{f057}', // fa-times-circle
            Self::Warning => '\u{f071}',     // fa-exclamation-triangle
            Self::HardDrive => '\u{f0a0}',   // fa-hdd
        }
    }
}

impl From<NerdFont> for char {
    fn from(icon: NerdFont) -> Self {
        icon.unicode()
    }
}
