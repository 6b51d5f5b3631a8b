//! Descriptor bitset and the readiness wait built on top of it.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

const WORD_BITS: usize = 64;

/// Fixed-capacity set of descriptor indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSet {
    capacity: usize,
    words: Box<[u64]>,
}

impl DescriptorSet {
    pub fn new(capacity: usize) -> Self {
        let nb_words = (capacity + WORD_BITS - 1) / WORD_BITS;
        Self {
            capacity,
            words: vec![0; nb_words].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns false, leaving the set untouched, when `i` is out of range.
    pub fn set(&mut self, i: usize) -> bool {
        if i >= self.capacity {
            return false;
        }
        self.words[i / WORD_BITS] |= 1 << (i % WORD_BITS);
        true
    }

    pub fn clear(&mut self, i: usize) {
        if i < self.capacity {
            self.words[i / WORD_BITS] &= !(1 << (i % WORD_BITS));
        }
    }

    pub fn is_set(&self, i: usize) -> bool {
        i < self.capacity && self.words[i / WORD_BITS] & (1 << (i % WORD_BITS)) != 0
    }

    pub fn clear_all(&mut self) {
        for word in self.words.iter_mut() {
            *word = 0;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.capacity).filter(move |i| self.is_set(*i))
    }
}

fn timeout_millis(timeout: Duration) -> libc::c_int {
    let ms = timeout.as_millis();
    if ms == 0 && timeout > Duration::from_millis(0) {
        // Round sub-millisecond waits up so they do not turn into busy polls.
        1
    } else if ms > libc::c_int::MAX as u128 {
        libc::c_int::MAX
    } else {
        ms as libc::c_int
    }
}

/// Blocks until one of the descriptors in `set` is readable or `timeout`
/// elapses, and returns the ready subset (empty on timeout).
///
/// An interrupted wait is reported as "nothing ready" so that callers simply
/// go around their loop again.
pub fn wait_readable(set: &DescriptorSet, timeout: Duration) -> io::Result<DescriptorSet> {
    let mut fds: Vec<libc::pollfd> = set
        .iter()
        .map(|fd| libc::pollfd {
            fd: fd as RawFd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    let mut ready = DescriptorSet::new(set.capacity());

    let ret = unsafe {
        libc::poll(
            fds.as_mut_ptr(),
            fds.len() as libc::nfds_t,
            timeout_millis(timeout),
        )
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(ready);
        }
        return Err(err);
    }

    for pfd in fds.iter() {
        if pfd.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            ready.set(pfd.fd as usize);
        }
    }
    Ok(ready)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixDatagram;
    use std::time::Instant;

    #[test]
    fn set_then_is_set() {
        let mut set = DescriptorSet::new(200);
        for i in 0..200 {
            assert!(set.set(i));
            assert!(set.is_set(i));
        }
        set.clear_all();
        for i in 0..200 {
            assert!(!set.is_set(i));
        }
        assert!(set.is_empty());
    }

    #[test]
    fn bits_are_independent() {
        let mut set = DescriptorSet::new(130);
        set.set(0);
        set.set(64);
        set.set(129);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 64, 129]);
        set.clear(64);
        assert!(!set.is_set(64));
        assert!(set.is_set(0) && set.is_set(129));
    }

    #[test]
    fn out_of_range() {
        let mut set = DescriptorSet::new(10);
        assert!(!set.set(10));
        assert!(!set.is_set(10));
        assert!(set.is_empty());
    }

    #[test]
    fn wait_times_out() {
        let (a, _b) = UnixDatagram::pair().unwrap();
        let mut set = DescriptorSet::new(a.as_raw_fd() as usize + 1);
        set.set(a.as_raw_fd() as usize);

        let start = Instant::now();
        let ready = wait_readable(&set, Duration::from_millis(30)).unwrap();
        assert!(ready.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn wait_reports_readable() {
        let (a, b) = UnixDatagram::pair().unwrap();
        b.send(b"ping").unwrap();
        let mut set = DescriptorSet::new(a.as_raw_fd() as usize + 1);
        set.set(a.as_raw_fd() as usize);

        let ready = wait_readable(&set, Duration::from_secs(1)).unwrap();
        assert!(ready.is_set(a.as_raw_fd() as usize));
    }
}
