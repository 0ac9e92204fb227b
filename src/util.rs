/// Anything whose size is measured in JVM stack or local variable slots
///
/// Values of type `long` and `double` are "category 2" and take two slots. Everything else takes
/// one.
pub trait Width {
    fn width(&self) -> usize;
}
