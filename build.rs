fn main() {
    // ESP-IDF link arguments are only needed for device builds; host builds
    // and tests compile without the IDF toolchain.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
