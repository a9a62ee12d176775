use uuid::Uuid;

/// Length of every participant identifier
pub const ID_LEN: usize = 8;

/// Stable receiver identifier derived from its push token: the first eight
/// alphanumeric characters, uppercased. A missing or too short token gets a
/// random identifier instead.
pub fn derive_receiver_id(token: Option<&str>) -> String {
    let derived: String = token
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(ID_LEN)
        .collect();

    if derived.len() == ID_LEN {
        derived.to_ascii_uppercase()
    } else {
        random_id()
    }
}

/// Fresh identifier for one call attempt
pub fn ephemeral_id() -> String {
    random_id()
}

fn random_id() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(ID_LEN)
        .collect::<String>()
        .to_ascii_uppercase()
}
