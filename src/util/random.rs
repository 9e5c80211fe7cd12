use rand::RngCore;
#[cfg(test)] use std::sync::Mutex;



#[cfg(test)]
/// automock expectations for static methods are global - hold this lock to avoid races
pub static MOCK_RANDOM_MUTEX: Mutex<()> = Mutex::new(());

#[cfg_attr(test, mockall::automock)]
pub trait Random: Send + Sync {
    fn fill_bytes(buf: &mut [u8]);
}
pub struct RngRandom {}
impl Random for RngRandom {
    fn fill_bytes(buf: &mut [u8]) {
        rand::rng().fill_bytes(buf)
    }
}
