/// Palette shared with the editor client.
pub const USER_COLORS: [&str; 12] = [
    "#FF5733", "#33FF57", "#3357FF", "#FF33F5", "#33FFF5", "#F5FF33",
    "#FF8C33", "#8C33FF", "#33FF8C", "#FF3333", "#33FFFF", "#FFFF33",
];

/// Deterministic display color for a username.
///
/// Reproduces the browser's `hash = code + ((hash << 5) - hash)` over UTF-16
/// code units, where the shift truncates to a signed 32-bit integer but the
/// running sum does not, so server- and client-side attribution agree.
pub fn presence_color(username: &str) -> &'static str {
    let mut hash: i64 = 0;
    for unit in username.encode_utf16() {
        let shifted = (hash as i32).wrapping_shl(5) as i64;
        hash = unit as i64 + (shifted - hash);
    }
    let index = (hash.unsigned_abs() % USER_COLORS.len() as u64) as usize;
    USER_COLORS[index]
}
