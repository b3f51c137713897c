use bitflags::bitflags;

bitflags! {
    /// Channel permission bitfield as reported by the platform gateway.
    /// Bit positions follow the platform's own permission integer so the
    /// gateway can forward its value untouched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u64 {
        const MANAGE_CHANNELS       = 1 << 4;
        const VIEW_CHANNEL          = 1 << 10;
        const SEND_MESSAGES         = 1 << 11;
        const MANAGE_MESSAGES       = 1 << 13;
        const ATTACH_FILES          = 1 << 15;
        const READ_MESSAGE_HISTORY  = 1 << 16;
        const MANAGE_WEBHOOKS       = 1 << 29;
    }
}

/// Everything the bot needs in a channel to relay into and out of it.
pub const RELAY_REQUIRED: Permissions = Permissions::SEND_MESSAGES
    .union(Permissions::MANAGE_WEBHOOKS)
    .union(Permissions::READ_MESSAGE_HISTORY)
    .union(Permissions::ATTACH_FILES);

/// Result of checking a required set against what the platform granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionCheck {
    pub granted: Permissions,
    pub missing: Permissions,
}

impl PermissionCheck {
    pub fn evaluate(granted: Permissions, required: Permissions) -> Self {
        Self {
            granted,
            missing: required & !granted,
        }
    }

    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty()
    }

    /// Human-readable names of the missing permissions, in bit order.
    pub fn missing_names(&self) -> Vec<String> {
        describe(self.missing)
    }
}

/// Human-readable names for a permission set, in bit order.
pub fn describe(perms: Permissions) -> Vec<String> {
    perms
        .iter()
        .map(|flag| display_name(flag).to_string())
        .collect()
}

fn display_name(flag: Permissions) -> &'static str {
    match flag {
        Permissions::MANAGE_CHANNELS => "Manage Channels",
        Permissions::VIEW_CHANNEL => "View Channel",
        Permissions::SEND_MESSAGES => "Send Messages",
        Permissions::MANAGE_MESSAGES => "Manage Messages",
        Permissions::ATTACH_FILES => "Attach Files",
        Permissions::READ_MESSAGE_HISTORY => "Read Message History",
        Permissions::MANAGE_WEBHOOKS => "Manage Webhooks",
        _ => "Unknown",
    }
}
