use miette::{IntoDiagnostic, Result, bail};
use std::io::{self, IsTerminal, Write};

/// Ask a yes/no question on the terminal. Anything but "y" or "yes" is a no.
pub fn confirm(message: &str) -> Result<bool> {
    if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
        bail!(
            help = "pass --create or --no-create to answer in advance",
            "Cannot prompt for confirmation in non-interactive mode."
        );
    }

    write!(io::stderr(), "{message} [y/N] ").into_diagnostic()?;
    io::stderr().flush().into_diagnostic()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input).into_diagnostic()?;

    Ok(matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
