//! Design-time helpers for schema modules: property constructors and
//! compound properties built on the core property system.

mod image;
mod props;

pub use image::{image, image_value};
pub use props::{
    boolean, bytes, date, datetime, duration, enumeration, float, integer, link, list, map,
    password, reference, text, time_of_day,
};
