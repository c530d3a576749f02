/// Raw `users` row. The password column holds `hex(hash).hex(salt)` and must
/// not be copied into any client-facing model.
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}
