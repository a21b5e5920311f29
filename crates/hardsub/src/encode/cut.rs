//! Split-encode-concat commands used to excise an interval.

use super::{ffmpeg_with_stats, format_decimal, EncodeSettings};
use std::path::Path;
use std::process::Command;

/// One side of the excised interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segment {
    /// `[0, t)`
    Until(f64),
    /// `[t, end of file)`
    From(f64),
}

/// Re-encode one segment of `input` into `output`.
pub fn build_segment_command(
    input: &Path,
    output: &Path,
    segment: Segment,
    settings: &EncodeSettings,
) -> Command {
    let mut cmd = ffmpeg_with_stats();
    if let Segment::From(start) = segment {
        cmd.arg("-ss").arg(format_decimal(start));
    }
    cmd.arg("-i").arg(input);
    if let Segment::Until(end) = segment {
        cmd.arg("-t").arg(format_decimal(end));
    }
    cmd.args(["-map", "0:v", "-map", "0:a?"]);
    settings.push_codec_args(&mut cmd);
    cmd.arg(output);
    cmd
}

/// Contents of a concat demuxer list for `parts`.
pub fn concat_list(parts: &[&Path]) -> String {
    parts
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', "'\\''")))
        .collect()
}

/// Join the parts listed in `list_file` without re-encoding.
pub fn build_concat_command(list_file: &Path, output: &Path) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-hide_banner", "-loglevel", "error"]);
    cmd.args(["-f", "concat", "-safe", "0"]);
    cmd.arg("-i").arg(list_file);
    cmd.args(["-c", "copy"]);
    cmd.arg(output);
    cmd
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_leading_segment_stops_at_begin() {
        let cmd = build_segment_command(
            Path::new("in.mp4"),
            Path::new("part1.mp4"),
            Segment::Until(90.5),
            &EncodeSettings::default(),
        );
        let args = get_command_args(&cmd);
        assert!(has_flag_with_value(&args, "-t", "90.5"));
        assert!(!has_flag(&args, "-ss"));
    }

    #[test]
    fn test_trailing_segment_seeks_before_input() {
        let cmd = build_segment_command(
            Path::new("in.mp4"),
            Path::new("part2.mp4"),
            Segment::From(180.0),
            &EncodeSettings::default(),
        );
        let args = get_command_args(&cmd);
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input);
        assert_eq!(args[ss + 1], "180");
        assert!(!has_flag(&args, "-t"));
    }

    #[test]
    fn test_concat_list_quotes_paths() {
        let list = concat_list(&[Path::new("/t/part1.mp4"), Path::new("/t/it's.mp4")]);
        assert_eq!(list, "file '/t/part1.mp4'\nfile '/t/it'\\''s.mp4'\n");
    }

    #[test]
    fn test_concat_command_copies_streams() {
        let args = get_command_args(&build_concat_command(
            Path::new("/t/list.txt"),
            Path::new("/t/CUT_ep.mp4"),
        ));
        assert!(has_flag_with_value(&args, "-f", "concat"));
        assert!(has_flag_with_value(&args, "-c", "copy"));
        assert_eq!(args.last().map(String::as_str), Some("/t/CUT_ep.mp4"));
    }
}
