use std::path::PathBuf;

use picshare::app::{Command, RunOptions};

const HELP: &str = "picshare - Browse a shared image gallery from the terminal.

  --version, -V          Show version and exit
  --help,    -h          Show this help message
  -v, --verbose          Debug logging on stderr
  --config PATH          Read settings from PATH

Feed:
  --category ID          Only show images in category ID
  --search TEXT          Match TEXT in titles and descriptions
  --sort KEY             created_at, view_count or download_count [asc|desc]
  --pages N              Load up to N pages

Other commands:
  --categories           List categories with image counts
  --image ID [--open]    Show one image and record the view
  --download ID          Save an image (use --out DIR to pick the folder)
  --mine                 Show your own images (requires sign in)
  --sign-in EMAIL        Password from PICSHARE_PASSWORD or stdin
  --sign-out             Forget the stored session";

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = match parse_args(&args) {
        Ok(Some(opts)) => opts,
        Ok(None) => return,
        Err(message) => {
            eprintln!("error: {message}\n\nRun with --help for usage.");
            std::process::exit(2);
        }
    };

    if let Err(err) = picshare::run(opts) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

/// Returns `None` when an informational flag was handled.
fn parse_args(args: &[String]) -> Result<Option<RunOptions>, String> {
    let mut opts = RunOptions::default();
    let mut commands = Vec::new();
    let mut open = false;
    let mut out_dir: Option<PathBuf> = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{name} needs a value"))
        };
        match arg.as_str() {
            "--version" | "-V" => {
                println!("picshare {}", picshare::VERSION);
                return Ok(None);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(None);
            }
            "-v" | "--verbose" => opts.verbose = true,
            "--config" => opts.config_file = Some(PathBuf::from(value("--config")?)),
            "--category" => opts.filters.category = value("--category")?,
            "--search" => opts.filters.search = value("--search")?,
            "--sort" => opts.filters.sort = value("--sort")?,
            "--pages" => {
                let raw = value("--pages")?;
                opts.pages = raw
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| format!("--pages expects a positive number, got {raw:?}"))?;
            }
            "--categories" => commands.push(Command::Categories),
            "--image" => commands.push(Command::Image {
                id: value("--image")?,
                open: false,
            }),
            "--open" => open = true,
            "--download" => commands.push(Command::Download {
                id: value("--download")?,
                out: None,
            }),
            "--out" => out_dir = Some(PathBuf::from(value("--out")?)),
            "--mine" => commands.push(Command::Mine),
            "--sign-in" => commands.push(Command::SignIn {
                email: value("--sign-in")?,
            }),
            "--sign-out" => commands.push(Command::SignOut),
            other => return Err(format!("unknown argument {other:?}")),
        }
    }

    if commands.len() > 1 {
        return Err("pick one command at a time".into());
    }
    opts.command = match commands.pop() {
        Some(Command::Image { id, .. }) => Command::Image { id, open },
        Some(Command::Download { id, .. }) => Command::Download { id, out: out_dir },
        Some(command) => command,
        None => Command::Feed,
    };
    Ok(Some(opts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_to_feed() {
        let opts = parse_args(&[]).unwrap().unwrap();
        assert_eq!(opts.command, Command::Feed);
        assert_eq!(opts.pages, 1);
    }

    #[test]
    fn feed_filters_are_collected() {
        let opts = parse_args(&args(&[
            "--category",
            "c1",
            "--search",
            "sunset",
            "--sort",
            "view_count",
            "--pages",
            "3",
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(opts.filters.category, "c1");
        assert_eq!(opts.filters.search, "sunset");
        assert_eq!(opts.filters.sort, "view_count");
        assert_eq!(opts.pages, 3);
    }

    #[test]
    fn modifiers_attach_to_their_command() {
        let opts = parse_args(&args(&["--open", "--image", "a1"])).unwrap().unwrap();
        assert_eq!(
            opts.command,
            Command::Image {
                id: "a1".into(),
                open: true
            }
        );
        let opts = parse_args(&args(&["--download", "a1", "--out", "/tmp/x"]))
            .unwrap()
            .unwrap();
        assert_eq!(
            opts.command,
            Command::Download {
                id: "a1".into(),
                out: Some(PathBuf::from("/tmp/x"))
            }
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args(&args(&["--pages", "0"])).is_err());
        assert!(parse_args(&args(&["--search"])).is_err());
        assert!(parse_args(&args(&["--mine", "--sign-out"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
    }
}
