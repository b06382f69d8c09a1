pub mod const_val;
pub mod info;
