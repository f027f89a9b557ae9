//! 트레이딩 운영을 위한 도메인 모델.

mod account;
mod indicator;
mod market_data;
mod order;
mod position;
mod risk;
mod sentiment;
mod signal;

pub use account::*;
pub use indicator::*;
pub use market_data::*;
pub use order::*;
pub use position::*;
pub use risk::*;
pub use sentiment::*;
pub use signal::*;
