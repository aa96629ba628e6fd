//! Windows Waveform Audio (winmm) 后端
//!
//! waveOut / waveIn 设备，CALLBACK_FUNCTION 模式：
//! WOM_DONE / WIM_DATA 到达时，回调把 WAVEHDR.dwUser 里的 slot 序号交给完成通知器。
//! 回调运行在系统线程上，只做一次 channel 投递。

use std::ffi::c_void;
use std::mem;
use std::ptr;

use super::{Direction, DeviceSelector, OpenRequest, SlotMemory, WaveDevice, WaveDriver};
use crate::audio::completion::CompletionNotifier;
use crate::audio::error::DeviceError;
use crate::audio::format::SampleFormat;

type HWAVEOUT = *mut c_void;
type HWAVEIN = *mut c_void;
type MMRESULT = u32;

const MMSYSERR_NOERROR: MMRESULT = 0;
const MMSYSERR_BADDEVICEID: MMRESULT = 2;
const MMSYSERR_ALLOCATED: MMRESULT = 4;
const WAVERR_BADFORMAT: MMRESULT = 32;

const WAVE_MAPPER: u32 = 0xFFFF_FFFF;
const WAVE_FORMAT_PCM: u16 = 1;
const CALLBACK_FUNCTION: u32 = 0x0003_0000;

const WOM_DONE: u32 = 0x3BD;
const WIM_DATA: u32 = 0x3C0;

const MAXPNAMELEN: usize = 32;

#[repr(C, packed(1))]
#[derive(Clone, Copy, Default)]
struct WaveFormatEx {
    format_tag: u16,
    channels: u16,
    samples_per_sec: u32,
    avg_bytes_per_sec: u32,
    block_align: u16,
    bits_per_sample: u16,
    cb_size: u16,
}

#[repr(C, packed(1))]
#[derive(Clone, Copy)]
struct WaveHdr {
    data: *mut u8,
    buffer_length: u32,
    bytes_recorded: u32,
    user: usize,
    flags: u32,
    loops: u32,
    next: *mut WaveHdr,
    reserved: usize,
}

impl WaveHdr {
    fn empty() -> Self {
        Self {
            data: ptr::null_mut(),
            buffer_length: 0,
            bytes_recorded: 0,
            user: 0,
            flags: 0,
            loops: 0,
            next: ptr::null_mut(),
            reserved: 0,
        }
    }
}

#[repr(C, packed(1))]
#[derive(Clone, Copy)]
struct WaveOutCapsW {
    mid: u16,
    pid: u16,
    driver_version: u32,
    pname: [u16; MAXPNAMELEN],
    formats: u32,
    channels: u16,
    reserved1: u16,
    support: u32,
}

#[repr(C, packed(1))]
#[derive(Clone, Copy)]
struct WaveInCapsW {
    mid: u16,
    pid: u16,
    driver_version: u32,
    pname: [u16; MAXPNAMELEN],
    formats: u32,
    channels: u16,
    reserved1: u16,
}

#[link(name = "winmm")]
extern "system" {
    fn waveOutGetNumDevs() -> u32;
    fn waveOutGetDevCapsW(device_id: usize, caps: *mut WaveOutCapsW, size: u32) -> MMRESULT;
    fn waveOutOpen(
        handle: *mut HWAVEOUT,
        device_id: u32,
        format: *const WaveFormatEx,
        callback: usize,
        instance: usize,
        flags: u32,
    ) -> MMRESULT;
    fn waveOutPrepareHeader(handle: HWAVEOUT, hdr: *mut WaveHdr, size: u32) -> MMRESULT;
    fn waveOutUnprepareHeader(handle: HWAVEOUT, hdr: *mut WaveHdr, size: u32) -> MMRESULT;
    fn waveOutWrite(handle: HWAVEOUT, hdr: *mut WaveHdr, size: u32) -> MMRESULT;
    fn waveOutReset(handle: HWAVEOUT) -> MMRESULT;
    fn waveOutClose(handle: HWAVEOUT) -> MMRESULT;

    fn waveInGetNumDevs() -> u32;
    fn waveInGetDevCapsW(device_id: usize, caps: *mut WaveInCapsW, size: u32) -> MMRESULT;
    fn waveInOpen(
        handle: *mut HWAVEIN,
        device_id: u32,
        format: *const WaveFormatEx,
        callback: usize,
        instance: usize,
        flags: u32,
    ) -> MMRESULT;
    fn waveInPrepareHeader(handle: HWAVEIN, hdr: *mut WaveHdr, size: u32) -> MMRESULT;
    fn waveInUnprepareHeader(handle: HWAVEIN, hdr: *mut WaveHdr, size: u32) -> MMRESULT;
    fn waveInAddBuffer(handle: HWAVEIN, hdr: *mut WaveHdr, size: u32) -> MMRESULT;
    fn waveInStart(handle: HWAVEIN) -> MMRESULT;
    fn waveInReset(handle: HWAVEIN) -> MMRESULT;
    fn waveInClose(handle: HWAVEIN) -> MMRESULT;
}

const HDR_SIZE: u32 = mem::size_of::<WaveHdr>() as u32;

/// 设备回调（系统线程）
///
/// `instance` 指向设备持有的 `Box<CompletionNotifier>`，设备 close 之后才释放
unsafe extern "system" fn wave_proc(
    _handle: *mut c_void,
    msg: u32,
    instance: usize,
    param1: usize,
    _param2: usize,
) {
    if msg != WOM_DONE && msg != WIM_DATA {
        return;
    }
    if instance == 0 || param1 == 0 {
        return;
    }

    let notifier = unsafe { &*(instance as *const CompletionNotifier) };
    let hdr = param1 as *const WaveHdr;
    let slot = unsafe { ptr::addr_of!((*hdr).user).read_unaligned() };
    notifier.complete(slot);
}

fn utf16_name(raw: &[u16]) -> String {
    let end = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
    String::from_utf16_lossy(&raw[..end])
}

fn mm_error(call: &'static str, code: MMRESULT) -> DeviceError {
    match code {
        MMSYSERR_ALLOCATED => DeviceError::Busy,
        _ => DeviceError::Mm { call, code },
    }
}

/// 按设备 id 排列的名称表
///
/// 查询失败的设备保留占位名，使列表位置始终等于 winmm 设备 id
fn indexed_names(count: usize, mut query: impl FnMut(usize) -> Option<String>) -> Vec<String> {
    (0..count)
        .map(|id| {
            query(id).unwrap_or_else(|| {
                log::warn!("Caps query failed for device {}", id);
                format!("Device {}", id)
            })
        })
        .collect()
}

pub struct WinMmDriver;

impl WinMmDriver {
    fn output_names() -> Vec<String> {
        let count = unsafe { waveOutGetNumDevs() };
        indexed_names(count as usize, |id| {
            let mut caps: WaveOutCapsW = unsafe { mem::zeroed() };
            let result = unsafe {
                waveOutGetDevCapsW(id, &mut caps, mem::size_of::<WaveOutCapsW>() as u32)
            };
            if result != MMSYSERR_NOERROR {
                return None;
            }
            let pname = caps.pname;
            Some(utf16_name(&pname))
        })
    }

    fn input_names() -> Vec<String> {
        let count = unsafe { waveInGetNumDevs() };
        indexed_names(count as usize, |id| {
            let mut caps: WaveInCapsW = unsafe { mem::zeroed() };
            let result = unsafe {
                waveInGetDevCapsW(id, &mut caps, mem::size_of::<WaveInCapsW>() as u32)
            };
            if result != MMSYSERR_NOERROR {
                return None;
            }
            let pname = caps.pname;
            Some(utf16_name(&pname))
        })
    }
}

impl WaveDriver for WinMmDriver {
    fn name(&self) -> &'static str {
        "winmm"
    }

    fn description(&self) -> &'static str {
        "Windows Waveform Audio"
    }

    fn detect_devices(&self, direction: Direction) -> Vec<String> {
        match direction {
            Direction::Playback => Self::output_names(),
            Direction::Capture => Self::input_names(),
        }
    }

    fn open(
        &self,
        request: &OpenRequest,
        notifier: CompletionNotifier,
    ) -> Result<Box<dyn WaveDevice>, DeviceError> {
        let spec = &request.spec;
        let format = spec.format;
        // waveform PCM 只有小端 signed 16/32 和 unsigned 8
        if !matches!(
            format,
            SampleFormat::U8 | SampleFormat::S16Lsb | SampleFormat::S32Lsb
        ) {
            return Err(DeviceError::FormatRejected(format));
        }

        let block_align = spec.channels * (format.bits() / 8);
        let waveformat = WaveFormatEx {
            format_tag: WAVE_FORMAT_PCM,
            channels: spec.channels,
            samples_per_sec: spec.freq,
            avg_bytes_per_sec: spec.freq * block_align as u32,
            block_align,
            bits_per_sample: format.bits(),
            cb_size: 0,
        };

        let device_id = match request.device {
            DeviceSelector::Default => WAVE_MAPPER,
            DeviceSelector::Index(index) => index as u32,
        };

        let notifier = Box::new(notifier);
        let instance = &*notifier as *const CompletionNotifier as usize;
        let callback = wave_proc as usize;

        let mut raw: *mut c_void = ptr::null_mut();
        let (result, call) = match request.direction {
            Direction::Playback => (
                unsafe {
                    waveOutOpen(&mut raw, device_id, &waveformat, callback, instance, CALLBACK_FUNCTION)
                },
                "waveOutOpen()",
            ),
            Direction::Capture => (
                unsafe {
                    waveInOpen(&mut raw, device_id, &waveformat, callback, instance, CALLBACK_FUNCTION)
                },
                "waveInOpen()",
            ),
        };

        match result {
            MMSYSERR_NOERROR => {}
            MMSYSERR_BADDEVICEID => {
                let count = self.detect_devices(request.direction).len();
                return Err(DeviceError::NoSuchIndex {
                    index: device_id as usize,
                    count,
                });
            }
            WAVERR_BADFORMAT => return Err(DeviceError::FormatRejected(format)),
            code => return Err(mm_error(call, code)),
        }

        log::info!(
            "winmm {} device opened: {}Hz {}ch {}",
            request.direction,
            spec.freq,
            spec.channels,
            format
        );

        let handle = match request.direction {
            Direction::Playback => Handle::Out(raw),
            Direction::Capture => Handle::In(raw),
        };

        Ok(Box::new(WinMmDevice {
            handle: Some(handle),
            headers: vec![WaveHdr::empty(); request.slot_count].into_boxed_slice(),
            prepared: vec![false; request.slot_count],
            capture_started: false,
            _notifier: notifier,
        }))
    }
}

#[derive(Clone, Copy)]
enum Handle {
    Out(HWAVEOUT),
    In(HWAVEIN),
}

/// 已打开的 waveOut / waveIn 设备
///
/// `headers` 地址在设备生命周期内固定（系统持有其指针）
struct WinMmDevice {
    handle: Option<Handle>,
    headers: Box<[WaveHdr]>,
    prepared: Vec<bool>,
    capture_started: bool,
    _notifier: Box<CompletionNotifier>,
}

// 句柄和 header 指针只在持有设备的线程上使用，回调只读 header
unsafe impl Send for WinMmDevice {}

impl WinMmDevice {
    fn header(&mut self, slot: usize) -> Result<*mut WaveHdr, DeviceError> {
        if slot >= self.headers.len() {
            return Err(DeviceError::Other(format!("slot {} out of range", slot)));
        }
        Ok(unsafe { self.headers.as_mut_ptr().add(slot) })
    }
}

impl WaveDevice for WinMmDevice {
    fn prepare(&mut self, slot: usize, memory: SlotMemory) -> Result<(), DeviceError> {
        let handle = self
            .handle
            .ok_or_else(|| DeviceError::Other("device closed".to_string()))?;
        let hdr = self.header(slot)?;

        let mut fresh = WaveHdr::empty();
        fresh.data = memory.as_ptr();
        fresh.buffer_length = memory.len() as u32;
        fresh.user = slot;
        unsafe { hdr.write(fresh) };

        let (result, call) = match handle {
            Handle::Out(h) => (unsafe { waveOutPrepareHeader(h, hdr, HDR_SIZE) }, "waveOutPrepareHeader()"),
            Handle::In(h) => (unsafe { waveInPrepareHeader(h, hdr, HDR_SIZE) }, "waveInPrepareHeader()"),
        };
        if result != MMSYSERR_NOERROR {
            return Err(mm_error(call, result));
        }

        self.prepared[slot] = true;
        log::debug!("winmm slot {} prepared ({} bytes)", slot, memory.len());
        Ok(())
    }

    fn unprepare(&mut self, slot: usize) {
        let Some(handle) = self.handle else {
            return;
        };
        if !self.prepared.get(slot).copied().unwrap_or(false) {
            return;
        }
        let Ok(hdr) = self.header(slot) else {
            return;
        };

        let result = match handle {
            Handle::Out(h) => unsafe { waveOutUnprepareHeader(h, hdr, HDR_SIZE) },
            Handle::In(h) => unsafe { waveInUnprepareHeader(h, hdr, HDR_SIZE) },
        };
        if result != MMSYSERR_NOERROR {
            log::warn!("winmm unprepare slot {} failed: MMRESULT {}", slot, result);
        }
        self.prepared[slot] = false;
    }

    fn write(&mut self, slot: usize, _data: &[u8]) -> Result<(), DeviceError> {
        let handle = self
            .handle
            .ok_or_else(|| DeviceError::Other("device closed".to_string()))?;
        let hdr = self.header(slot)?;

        match handle {
            Handle::Out(h) => {
                let result = unsafe { waveOutWrite(h, hdr, HDR_SIZE) };
                if result != MMSYSERR_NOERROR {
                    return Err(mm_error("waveOutWrite()", result));
                }
            }
            Handle::In(h) => {
                let result = unsafe { waveInAddBuffer(h, hdr, HDR_SIZE) };
                if result != MMSYSERR_NOERROR {
                    return Err(mm_error("waveInAddBuffer()", result));
                }
                if !self.capture_started {
                    let result = unsafe { waveInStart(h) };
                    if result != MMSYSERR_NOERROR {
                        return Err(mm_error("waveInStart()", result));
                    }
                    self.capture_started = true;
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        let result = match self.handle {
            Some(Handle::Out(h)) => unsafe { waveOutReset(h) },
            Some(Handle::In(h)) => unsafe { waveInReset(h) },
            None => return,
        };
        if result != MMSYSERR_NOERROR {
            log::warn!("winmm reset failed: MMRESULT {}", result);
        }
    }

    fn close(&mut self) {
        let Some(handle) = self.handle else {
            return;
        };

        for slot in 0..self.prepared.len() {
            self.unprepare(slot);
        }

        let result = match handle {
            Handle::Out(h) => unsafe { waveOutClose(h) },
            Handle::In(h) => unsafe { waveInClose(h) },
        };
        if result != MMSYSERR_NOERROR {
            log::warn!("winmm close failed: MMRESULT {}", result);
        }
        self.handle = None;
        log::info!("winmm device closed");
    }
}

impl Drop for WinMmDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_layouts() {
        assert_eq!(mem::size_of::<WaveFormatEx>(), 18);
        assert_eq!(
            mem::size_of::<WaveOutCapsW>(),
            2 + 2 + 4 + MAXPNAMELEN * 2 + 4 + 2 + 2 + 4
        );
    }

    #[test]
    fn test_utf16_name_stops_at_nul() {
        let mut raw = [0u16; MAXPNAMELEN];
        for (i, c) in "Speakers".encode_utf16().enumerate() {
            raw[i] = c;
        }
        assert_eq!(utf16_name(&raw), "Speakers");
    }

    #[test]
    fn test_failed_caps_keep_device_ids() {
        let names = indexed_names(3, |id| (id != 0).then(|| format!("Out {}", id)));
        assert_eq!(names, vec!["Device 0", "Out 1", "Out 2"]);

        let registry_position = names.iter().position(|n| n == "Out 2");
        assert_eq!(registry_position, Some(2));
    }
}
