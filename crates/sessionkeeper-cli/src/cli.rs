use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ArgAction, ColorChoice, Command,
};

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("sessionkeeper")
        .about("Resume a session and issue authenticated requests")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("base-url")
                .short('u')
                .long("base-url")
                .help("Authentication Service base URL, example: https://erp.school.tld/api")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .help("Log filter, example: debug or sessionkeeper_core=trace (default: warn)")
                .env("RUST_LOG")
                .global(true),
        )
        .subcommand(Command::new("whoami").about("Show who the current session belongs to"))
        .subcommand(
            Command::new("get")
                .about("GET one or more protected paths concurrently and print the JSON")
                .arg(
                    Arg::new("email")
                        .short('e')
                        .long("email")
                        .help("Log in with this email first")
                        .env("SESSIONKEEPER_EMAIL"),
                )
                .arg(
                    Arg::new("paths")
                        .help("Paths relative to the base URL, example: /students")
                        .required(true)
                        .action(ArgAction::Append),
                ),
        )
}
