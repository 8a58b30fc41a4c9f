//! Rendering commands as shell lines.
//!
//! Nothing here is executed through a shell; the text is only shown to the
//! operator in debug output and manual recovery instructions.

/// Quote `arg` for pasting into a POSIX shell, leaving plain words untouched.
///
/// ```
/// use crashcap::common::shell::shell_quote;
///
/// assert_eq!(shell_quote("/dev/sda3"), "/dev/sda3");
/// assert_eq!(shell_quote("/mnt/my swap"), "'/mnt/my swap'");
/// ```
pub fn shell_quote(arg: &str) -> String {
    let plain = |c: char| c.is_alphanumeric() || "-_=/.:,+".contains(c);
    match arg {
        "" => "''".to_string(),
        _ if arg.chars().all(plain) => arg.to_string(),
        _ => format!("'{}'", arg.replace('\'', r"'\''")),
    }
}

/// Octal-escape the characters fstab(5) treats as field separators.
pub fn fstab_escape(field: &str) -> String {
    field
        .replace('\\', "\\134")
        .replace(' ', "\\040")
        .replace('\t', "\\011")
        .replace('\n', "\\012")
}

/// The mount-table entry that activates `target` as swap at boot.
pub fn fstab_swap_line(target: &str) -> String {
    format!("{} none swap sw 0 0", fstab_escape(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_and_option_words_stay_bare() {
        for word in ["/dev/nvme0n1p3", "+C", "of=/swapfile", "0600", "bs=1M"] {
            assert_eq!(shell_quote(word), word);
        }
    }

    #[test]
    fn awkward_paths_are_single_quoted() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("/srv/swap file"), "'/srv/swap file'");
        assert_eq!(shell_quote("/srv/it's"), r"'/srv/it'\''s'");
        assert_eq!(shell_quote("$HOME/swap"), "'$HOME/swap'");
    }

    #[test]
    fn fstab_line_uses_swap_defaults() {
        assert_eq!(fstab_swap_line("/swapfile"), "/swapfile none swap sw 0 0");
    }

    #[test]
    fn fstab_fields_escape_blanks() {
        assert_eq!(
            fstab_swap_line("/srv/my swap"),
            r"/srv/my\040swap none swap sw 0 0"
        );
        assert_eq!(fstab_escape("/srv/a\tb"), r"/srv/a\011b");
        assert_eq!(fstab_escape(r"/srv/back\slash"), r"/srv/back\134slash");
        assert_eq!(fstab_escape("/dev/sda3"), "/dev/sda3");
    }
}
