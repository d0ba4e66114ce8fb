use crate::all::*;

use std::sync::Condvar;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

// Result of running the eye-feature extractor on one frame. `method` is a
// free-text label describing how (or whether) the eyes were found.
#[derive(Clone, Debug)]
pub struct Detection {
  pub face: Option<Face>,
  pub method: String,
}

impl Detection {
  pub fn found(face: Face, method: &str) -> Detection {
    Detection { face: Some(face), method: method.to_string() }
  }

  pub fn not_found(method: &str) -> Detection {
    Detection { face: None, method: method.to_string() }
  }
}

// The "process one frame" function the calibrator samples from.
pub trait FrameProcessor: Send {
  fn process_frame(&mut self) -> Detection;
}

// Produces frames for `FrameSource`, e.g. a camera or a recording.
// End of data is signaled by `Result::Ok(Option::None)`.
pub trait FrameGrabber: Send + 'static {
  type Frame: Send + Sync + 'static;
  fn grab(&mut self) -> Result<Option<Self::Frame>>;
}

pub trait EyeFeatureExtractor<T>: Send {
  fn extract(&mut self, frame: &T) -> Detection;
}

pub struct SourceFrame<T> {
  // Increases by one for every grabbed frame.
  pub number: usize,
  pub data: Arc<T>,
}

impl<T> Clone for SourceFrame<T> {
  fn clone(&self) -> Self {
    SourceFrame { number: self.number, data: Arc::clone(&self.data) }
  }
}

struct Slot<T> {
  frame: Option<SourceFrame<T>>,
  // Whether `frame` has been returned by `read()`.
  read: bool,
}

// Grabs frames on a background thread into a single slot. Readers get the
// most recent frame and may see the same frame more than once.
//
// A live source drops the frames nobody read in time. In lockstep the
// grabber instead waits until the current frame has been read before
// publishing the next one, so that a recording without real-time pacing is
// consumed at the reader's rate rather than exhausted at once.
pub struct FrameSource<T> {
  shared: Arc<(Mutex<Slot<T>>, Condvar)>,
  stop: Arc<AtomicBool>,
  finished: Arc<AtomicBool>,
  thread: Option<JoinHandle<()>>,
}

// Returns false if the slot is no longer usable.
fn publish<T>(
  shared: &(Mutex<Slot<T>>, Condvar),
  frame: SourceFrame<T>,
  lockstep: bool,
  stop: &AtomicBool,
) -> bool {
  let (slot, frame_read) = shared;
  let mut slot = match slot.lock() {
    Ok(slot) => slot,
    Err(_) => return false,
  };
  if lockstep {
    while slot.frame.is_some() && !slot.read {
      if stop.load(Ordering::Relaxed) { return false }
      slot = match frame_read.wait_timeout(slot, Duration::from_millis(10)) {
        Ok((slot, _)) => slot,
        Err(_) => return false,
      };
    }
  }
  slot.frame = Some(frame);
  slot.read = false;
  true
}

impl<T: Send + Sync + 'static> FrameSource<T> {
  pub fn start<G: FrameGrabber<Frame = T>>(mut grabber: G, lockstep: bool) -> Result<FrameSource<T>> {
    let shared = Arc::new((Mutex::new(Slot { frame: None, read: false }), Condvar::new()));
    let stop = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let thread = {
      let shared = Arc::clone(&shared);
      let stop = Arc::clone(&stop);
      let finished = Arc::clone(&finished);
      thread::Builder::new()
        .name("frame-source".to_string())
        .spawn(move || {
          let mut number = 0;
          while !stop.load(Ordering::Relaxed) {
            match grabber.grab() {
              Ok(Some(frame)) => {
                let frame = SourceFrame { number, data: Arc::new(frame) };
                number += 1;
                if !publish(&shared, frame, lockstep, &stop) { break }
              },
              Ok(None) => {
                debug!("Frame source reached end of data after {} frames.", number);
                break;
              },
              Err(err) => {
                error!("Frame source failed: {:#}", err);
                break;
              },
            }
          }
          finished.store(true, Ordering::Relaxed);
        })
        .context("Failed to spawn frame source thread.")?
    };
    Ok(FrameSource {
      shared,
      stop,
      finished,
      thread: Some(thread),
    })
  }

  // Never blocks, also in lockstep.
  pub fn read(&self) -> Option<SourceFrame<T>> {
    let (slot, frame_read) = &*self.shared;
    let mut slot = slot.lock().ok()?;
    slot.read = true;
    frame_read.notify_one();
    slot.frame.clone()
  }

  // True once the grabber ran out of frames or failed.
  pub fn is_finished(&self) -> bool {
    self.finished.load(Ordering::Relaxed)
  }

  pub fn stop(&mut self) {
    self.stop.store(true, Ordering::Relaxed);
    if let Some(thread) = self.thread.take() {
      if thread.join().is_err() {
        warn!("Frame source thread panicked.");
      }
    }
  }
}

impl<T> Drop for FrameSource<T> {
  fn drop(&mut self) {
    self.stop.store(true, Ordering::Relaxed);
    if let Some(thread) = self.thread.take() {
      let _ = thread.join();
    }
  }
}

// Frame source and extractor glued into a `FrameProcessor`.
pub struct FramePipeline<T, E> {
  source: FrameSource<T>,
  extractor: E,
}

impl<T: Send + Sync + 'static, E: EyeFeatureExtractor<T>> FramePipeline<T, E> {
  pub fn new(source: FrameSource<T>, extractor: E) -> FramePipeline<T, E> {
    FramePipeline { source, extractor }
  }

  pub fn is_finished(&self) -> bool {
    self.source.is_finished()
  }

  // Processes the latest frame only if it is newer than `last_number`.
  pub fn process_new_frame(&mut self, last_number: &mut Option<usize>) -> Option<Detection> {
    let frame = self.source.read()?;
    if *last_number == Some(frame.number) { return None }
    *last_number = Some(frame.number);
    Some(self.extractor.extract(&frame.data))
  }
}

impl<T: Send + Sync + 'static, E: EyeFeatureExtractor<T>> FrameProcessor for FramePipeline<T, E> {
  fn process_frame(&mut self) -> Detection {
    match self.source.read() {
      Some(frame) => self.extractor.extract(&frame.data),
      None => Detection::not_found("no frame"),
    }
  }
}
