pub mod mtn;
pub mod orange;
pub mod pawapay;

pub use mtn::MtnProvider;
pub use orange::OrangeProvider;
pub use pawapay::PawapayProvider;
