//! Error display for the CLI.

use colored::Colorize;
use farm_controller::HarnessError;

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    let Some(harness_err) = err.downcast_ref::<HarnessError>() else {
        return;
    };

    eprintln!("Reason: {}", harness_err.reason_code());
    if let Some(hint) = hint(harness_err) {
        eprintln!("\n{}", format!("Hint: {hint}").yellow());
    }
}

fn hint(err: &HarnessError) -> Option<&'static str> {
    match err {
        HarnessError::DeploymentRejected { .. } => {
            Some("Check the host's management endpoint and that the artifact locator exists.")
        }
        HarnessError::ReadinessTimeout { .. } => Some(
            "The node never reached the target state. Check the host, or raise timeouts.lifecycle_secs.",
        ),
        HarnessError::ClientConstructionTimeout { .. } => {
            Some("Run `farmctl status` to confirm the node is up before asking for a client.")
        }
        HarnessError::SynchronizationTimeout { .. } => Some(
            "Nodes disagree on their containers. Check the controller, or raise timeouts.sync_secs.",
        ),
        HarnessError::UnknownRole { .. } => {
            Some("Run `farmctl status` to list the roles in the config.")
        }
        HarnessError::StaleHandle { .. } => {
            Some("The node was restarted. Ask for a fresh client.")
        }
        HarnessError::Cleanup { .. } => {
            Some("Check the controller url and credentials in the config.")
        }
        HarnessError::Config(_) => Some("Check the config file passed with --config."),
        HarnessError::HttpClient(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_id::NodeRole;
    use rstest::rstest;
    use std::time::Duration;

    fn role() -> NodeRole {
        NodeRole::parse("secondary").unwrap()
    }

    #[rstest]
    #[case::unknown_role(HarnessError::UnknownRole { role: role() }, "farmctl status")]
    #[case::stale(HarnessError::StaleHandle { node: role(), generation: 2 }, "fresh client")]
    #[case::config(HarnessError::Config("no nodes".into()), "--config")]
    #[case::client(
        HarnessError::ClientConstructionTimeout {
            node: role(),
            elapsed: Duration::from_secs(30),
            attempts: 150,
            last_error: "node is down, not up".into(),
        },
        "farmctl status"
    )]
    fn hints_point_at_the_next_step(#[case] err: HarnessError, #[case] expected: &str) {
        let hint = hint(&err).unwrap();
        assert!(hint.contains(expected), "{hint}");
    }

    #[test]
    fn cleanup_failures_have_a_hint() {
        let err = HarnessError::Cleanup {
            target: "template-one".into(),
            reason: "500".into(),
        };
        assert!(hint(&err).is_some());
    }
}
