use sting_auth::cli::{actions, actions::Action, start};

// Exit codes: 0 authorized, 1 not authorized, 2 hard failure.
#[tokio::main]
async fn main() {
    // Start the program
    let (action, globals) = match start() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(2);
        }
    };

    // Handle the action
    let code = match action {
        Action::Check { .. } => match actions::check::handle(&action, &globals).await {
            Ok(code) => code,
            Err(err) => {
                eprintln!("Error: {err}");
                2
            }
        },
    };

    std::process::exit(code);
}
