//! Print a share token for another client.

use sync_client::SessionConfig;

/// Run the token command.
pub fn run(config: &SessionConfig, with_passphrase: bool) {
    println!("{}", config.share_token(with_passphrase));
    if with_passphrase {
        eprintln!("Note: this token contains the passphrase. Share it only with trusted people.");
    }
}
