/// Prepends `unset <keys>` to a shell command so subprocesses the agent's
/// tools spawn never see the credentials the SDK itself needs.
pub fn prepend_secret_unset(command: &str, secret_env_keys: &[String]) -> String {
    let keys: Vec<&str> = secret_env_keys
        .iter()
        .map(String::as_str)
        .filter(|key| !key.trim().is_empty())
        .collect();
    if keys.is_empty() {
        return command.to_string();
    }
    format!("unset {} && {command}", keys.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_prepend_secret_unset_lists_all_keys() {
        let scrubbed = prepend_secret_unset(
            "cargo test",
            &["API_KEY".to_string(), "API_TOKEN".to_string()],
        );
        assert_eq!(scrubbed, "unset API_KEY API_TOKEN && cargo test");
    }

    #[test]
    fn unit_prepend_secret_unset_without_keys_leaves_command_untouched() {
        assert_eq!(prepend_secret_unset("ls -la", &[]), "ls -la");
        assert_eq!(
            prepend_secret_unset("ls -la", &["  ".to_string()]),
            "ls -la"
        );
    }
}
