// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Frame service call-ins.
//!
//! [`FrameServer`] is the seam a remote transport plugs into. The capture loop
//! publishes each converted frame; remote requests are queued to a reply
//! worker which answers each one with the most recent frame. No transport is
//! provided here.

use std::{
    sync::{
        mpsc::{self, Receiver, SyncSender},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
};

use unix_ts::Timestamp;

use crate::{
    config::{CameraDescription, ImageDescription},
    Error,
};

/// Requests that may wait in the reply queue before submitters block.
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// One published image.
#[derive(Debug, Clone)]
pub struct ImageData {
    pub description: ImageDescription,
    pub timestamp: Timestamp,
    pub pixels: Vec<u8>,
}

type Latest = Arc<Mutex<Option<Arc<ImageData>>>>;

enum Request {
    Image(mpsc::Sender<Option<Arc<ImageData>>>),
}

pub struct FrameServer {
    camera: CameraDescription,
    image: ImageDescription,
    latest: Latest,
    requests: Option<SyncSender<Request>>,
    worker: Option<JoinHandle<()>>,
}

impl FrameServer {
    pub fn new(camera: CameraDescription, image: ImageDescription) -> Self {
        FrameServer::with_queue_depth(camera, image, DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_queue_depth(
        camera: CameraDescription,
        image: ImageDescription,
        depth: usize,
    ) -> Self {
        let latest = Latest::default();
        let (tx, rx) = mpsc::sync_channel(depth);
        let worker = {
            let latest = latest.clone();
            thread::spawn(move || reply_worker(rx, latest))
        };
        log::debug!("frame server for {:?} started", camera.name);

        FrameServer {
            camera,
            image,
            latest,
            requests: Some(tx),
            worker: Some(worker),
        }
    }

    pub fn camera_description(&self) -> &CameraDescription {
        &self.camera
    }

    pub fn image_description(&self) -> ImageDescription {
        self.image
    }

    /// Replace the latest image with `pixels`.
    pub fn publish(&self, timestamp: Timestamp, pixels: Vec<u8>) {
        let data = Arc::new(ImageData {
            description: self.image,
            timestamp,
            pixels,
        });
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(data);
    }

    /// Queue a request; the reply arrives on the returned receiver.
    ///
    /// Blocks while the queue is full.
    pub fn request_image(&self) -> Result<Receiver<Option<Arc<ImageData>>>, Error> {
        let requests = self.requests.as_ref().ok_or(Error::ServiceStopped)?;
        let (reply, rx) = mpsc::channel();
        requests
            .send(Request::Image(reply))
            .map_err(|_| Error::ServiceStopped)?;
        Ok(rx)
    }

    /// The latest image, `None` until the first publish.
    pub fn get_image(&self) -> Result<Option<Arc<ImageData>>, Error> {
        self.request_image()?
            .recv()
            .map_err(|_| Error::ServiceStopped)
    }

    /// Close the queue, let the worker answer what is left, and join it.
    pub fn shutdown(&mut self) {
        self.requests = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("frame server worker panicked");
            }
            log::debug!("frame server for {:?} stopped", self.camera.name);
        }
    }
}

impl Drop for FrameServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reply_worker(rx: Receiver<Request>, latest: Latest) {
    for request in rx {
        match request {
            Request::Image(reply) => {
                let image = latest
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                // the requester may have given up waiting
                let _ = reply.send(image);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fourcc::FourCC;

    fn server() -> FrameServer {
        FrameServer::with_queue_depth(
            CameraDescription {
                name: "front".into(),
                short_description: "Front camera".into(),
                streaming_uri: String::new(),
            },
            ImageDescription {
                width: 2,
                height: 1,
                format: FourCC::RGB3,
            },
            2,
        )
    }

    #[test]
    fn test_latest_image() {
        let srv = server();
        assert_eq!(srv.camera_description().name, "front");
        assert!(srv.get_image().unwrap().is_none());

        srv.publish(Timestamp::new(1, 0), vec![1; 6]);
        srv.publish(Timestamp::new(2, 0), vec![2; 6]);

        let image = srv.get_image().unwrap().unwrap();
        assert_eq!(image.pixels, vec![2; 6]);
        assert_eq!(image.description.width, 2);
        assert_eq!(image.description.format, FourCC::RGB3);
    }

    #[test]
    fn test_concurrent_requests() {
        let srv = server();
        srv.publish(Timestamp::new(5, 0), vec![7; 6]);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..10 {
                        let image = srv.get_image().unwrap().unwrap();
                        assert_eq!(image.pixels[0], 7);
                    }
                });
            }
        });
    }

    #[test]
    fn test_shutdown() {
        let mut srv = server();
        let pending = srv.request_image().unwrap();
        srv.shutdown();

        // queued before shutdown, still answered
        assert!(pending.recv().unwrap().is_none());
        assert!(matches!(srv.get_image(), Err(Error::ServiceStopped)));
        srv.shutdown();
    }
}
