mod impls;
mod market;
mod requests;
mod responses;
mod routing;
mod util;

pub use impls::*;
pub use market::*;
pub use requests::*;
pub use responses::*;
pub use routing::*;
pub use util::*;
