pub mod clock;
pub mod config;
pub mod error;
pub mod router;
pub mod state;

pub mod crypto {
    pub mod codes;
}

pub mod models {
    pub mod security_session;
}

pub mod store {
    pub mod memory;
    pub mod session_store;
}

pub mod services {
    pub mod security;
    pub mod sweeper;
}

pub mod handlers {
    pub mod security;
}

pub mod validation {
    pub mod security;
}
