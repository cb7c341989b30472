#![doc = env!("CARGO_PKG_DESCRIPTION")]

#[doc(inline)]
pub use mlswarp_image as image;

#[doc(inline)]
pub use mlswarp_imgproc as imgproc;

#[doc(inline)]
pub use mlswarp_io as io;
