pub mod models {
    pub mod map;
}

pub mod client;
pub mod config;
pub mod db {
    pub mod store;
}
pub mod server;
pub mod utils;
pub mod services {
    pub mod coords;
    pub mod realtime;
}
pub mod viewer {
    pub mod camera;
    pub mod geometry;
    pub mod render;
    pub mod session;
    pub mod state;
}
