//! CLI argument definitions for `avpace`.

use clap::{Arg, ArgAction, Command};

/// Build the CLI argument parser and command definitions.
pub fn build_cli() -> Command {
    Command::new("avpace")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Play media with audio-clocked video pacing")
        .arg_required_else_help(true)
        .subcommand_negates_reqs(true)
        .arg(
            Arg::new("seek")
                .long("seek")
                .short('s')
                .value_name("TIME")
                .value_parser(clap::value_parser!(f64))
                .help("Seek to the given time in seconds"),
        )
        .arg(
            Arg::new("GAIN")
                .long("gain")
                .short('g')
                .value_name("GAIN")
                .value_parser(clap::value_parser!(f32))
                .default_value("70")
                .help("The playback gain in percent"),
        )
        .arg(
            Arg::new("settings")
                .long("settings")
                .value_name("PATH")
                .help("Path to a JSON file with playback settings"),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .action(ArgAction::SetTrue)
                .help("Log progress instead of drawing the status screen"),
        )
        .arg(
            Arg::new("INPUT")
                .help("The input file path")
                .required(true)
                .index(1),
        )
        .subcommand(
            Command::new("probe")
                .about("Print the streams and duration of a file as JSON")
                .arg(
                    Arg::new("INPUT")
                        .help("The input file path")
                        .required(true)
                        .index(1),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Play a generated A/V source headless and print sync statistics")
                .arg(
                    Arg::new("seconds")
                        .long("seconds")
                        .value_name("SECONDS")
                        .value_parser(clap::value_parser!(f64))
                        .default_value("5"),
                )
                .arg(
                    Arg::new("fps")
                        .long("fps")
                        .value_name("FPS")
                        .value_parser(clap::value_parser!(f64))
                        .default_value("25"),
                )
                .arg(
                    Arg::new("no-audio")
                        .long("no-audio")
                        .action(ArgAction::SetTrue)
                        .help("Generate video only; video paces itself"),
                )
                .arg(
                    Arg::new("seek")
                        .long("seek")
                        .value_name("TIME")
                        .value_parser(clap::value_parser!(f64))
                        .help("Seek to the given time before playing"),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_playback_flags() {
        let matches = build_cli()
            .try_get_matches_from(["avpace", "movie.mkv", "--seek", "12.5", "-g", "40", "-q"])
            .unwrap();
        assert_eq!(matches.get_one::<String>("INPUT").map(String::as_str), Some("movie.mkv"));
        assert_eq!(matches.get_one::<f64>("seek"), Some(&12.5));
        assert_eq!(matches.get_one::<f32>("GAIN"), Some(&40.0));
        assert!(matches.get_flag("quiet"));
    }

    #[test]
    fn subcommands_do_not_need_the_top_level_input() {
        let matches = build_cli()
            .try_get_matches_from(["avpace", "simulate", "--seconds", "1", "--no-audio"])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "simulate");
        assert_eq!(sub.get_one::<f64>("seconds"), Some(&1.0));
        assert_eq!(sub.get_one::<f64>("fps"), Some(&25.0));
        assert!(sub.get_flag("no-audio"));
    }

    #[test]
    fn rejects_non_numeric_seek() {
        assert!(build_cli()
            .try_get_matches_from(["avpace", "a.wav", "--seek", "soon"])
            .is_err());
    }
}
