pub mod cocalibration;
pub mod sensitivity;
