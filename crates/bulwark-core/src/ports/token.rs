//! Challenge id generation.

/// Produces unguessable challenge ids.
pub trait TokenGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Random v4 UUIDs in simple (hex) form.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidTokenGenerator;

impl TokenGenerator for UuidTokenGenerator {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}
