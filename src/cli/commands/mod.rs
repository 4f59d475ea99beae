use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ColorChoice, Command,
};

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("sting-auth")
        .about("Session and authentication-level coordination for STING")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg(
            Arg::new("idp-url")
                .long("idp-url")
                .help("Identity provider base URL, example: https://idp.sting.dev")
                .env("STING_AUTH_IDP_URL")
                .required(true),
        )
        .arg(
            Arg::new("app-url")
                .long("app-url")
                .help("Application backend base URL, example: https://app.sting.dev")
                .env("STING_AUTH_APP_URL")
                .required(true),
        )
        .arg(
            Arg::new("session-token")
                .long("session-token")
                .help("Session token forwarded to the identity provider")
                .env("STING_AUTH_SESSION_TOKEN"),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbosity")
                .help("Log level: error, warn, info, debug, trace (or 0-4)")
                .default_value("0")
                .env("STING_AUTH_LOG_LEVEL")
                .value_parser(validator_log_level()),
        )
        .subcommand(
            Command::new("check")
                .about("Establish the current session and authorize a route")
                .arg(
                    Arg::new("route")
                        .short('r')
                        .long("route")
                        .help("Route to authorize, example: /dashboard/admin")
                        .required(true),
                )
                .arg(
                    Arg::new("max-attempts")
                        .long("max-attempts")
                        .help("Bounded session poll attempts")
                        .default_value("10")
                        .value_parser(clap::value_parser!(u32)),
                )
                .arg(
                    Arg::new("poll-interval-ms")
                        .long("poll-interval-ms")
                        .help("Session poll interval in milliseconds")
                        .default_value("500")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
}
