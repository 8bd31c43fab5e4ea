pub mod address_format;
