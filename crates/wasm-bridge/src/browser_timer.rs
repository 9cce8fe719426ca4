//! `setTimeout` backed timer for acknowledgment timeouts in the browser

use chart_frame_protocol::Timer;
use futures::future::LocalBoxFuture;
use std::time::Duration;
use wasm_bindgen::JsValue;
use wasm_bindgen_futures::JsFuture;

#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserTimer;

impl Timer for BrowserTimer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let millis = duration.as_millis().min(i32::MAX as u128) as i32;

        let promise = js_sys::Promise::new(&mut |resolve, _reject| {
            let scheduled = web_sys::window()
                .ok_or_else(|| JsValue::from_str("No global window"))
                .and_then(|window| {
                    window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, millis)
                });

            // Without a timer, expire immediately rather than wait forever
            if let Err(e) = scheduled {
                log::warn!("setTimeout failed: {e:?}");
                let _ = resolve.call0(&JsValue::NULL);
            }
        });

        Box::pin(async move {
            let _ = JsFuture::from(promise).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    async fn test_sleep_resolves() {
        BrowserTimer.sleep(Duration::from_millis(5)).await;
    }
}
