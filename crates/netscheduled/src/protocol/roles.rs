//! Role bits gating command access.

use bitflags::bitflags;

bitflags! {
    /// Set of roles held by a client, or required by a command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RoleMask: u16 {
        /// Server administrator.
        const ADMIN = 1 << 0;
        /// May administer queues (drop all jobs).
        const QUEUE_ADMIN = 1 << 1;
        /// May create dynamic queues from classes.
        const DYN_CLASS_ADMIN = 1 << 2;
        /// May delete dynamic queues.
        const DYN_QUEUE_ADMIN = 1 << 3;
        /// Bound to an existing queue.
        const QUEUE = 1 << 4;
        /// May submit jobs and read results.
        const SUBMITTER = 1 << 5;
        /// May execute jobs.
        const WORKER = 1 << 6;
        /// Required by commands every client may run.
        const ANY = 1 << 7;

        /// Roles granted by the administrator allow-list.
        const ADMINISTRATOR = Self::ADMIN.bits()
            | Self::QUEUE_ADMIN.bits()
            | Self::DYN_CLASS_ADMIN.bits()
            | Self::DYN_QUEUE_ADMIN.bits();
        /// Roles granted to dynamic queue administrators.
        const DYNAMIC_ADMINISTRATOR = Self::DYN_CLASS_ADMIN.bits() | Self::DYN_QUEUE_ADMIN.bits();
    }
}

impl RoleMask {
    /// Returns `true` when a client holding `self` may run a command that
    /// requires `required`.
    #[must_use]
    pub fn permits(self, required: Self) -> bool {
        required.contains(Self::ANY) || self.intersects(required)
    }

    /// Names of the roles in `self`, for diagnostics.
    #[must_use]
    pub fn role_names(self) -> Vec<&'static str> {
        self.iter_names()
            .filter(|(name, _)| !matches!(*name, "ADMINISTRATOR" | "DYNAMIC_ADMINISTRATOR"))
            .map(|(name, _)| name)
            .collect()
    }
}
