extern crate stem;
extern crate half;

#[cfg(test)]
mod tensor_spec {
    use std::sync::Arc;

    use half::f16;

    use stem::backend::Backend;
    use stem::device::{DeviceConfig, DeviceContext};
    use stem::numeric::{Float, NumericKind};
    use stem::tensor::{Latest, SharedTensor, Tensor};

    fn context() -> Arc<DeviceContext> {
        Arc::new(DeviceContext::new(DeviceConfig::default()))
    }

    #[test]
    fn size_is_the_product_of_the_dimensions() {
        for dims in &[vec![3], vec![2, 3], vec![4, 1, 2, 5]] {
            let tensor = Tensor::<f32>::new(dims);
            assert_eq!(tensor.size(), dims.iter().product::<usize>());
        }
        let mut tensor = Tensor::<f32>::new(&[2, 2]);
        tensor.resize(&[3, 1, 2, 2], 1.0);
        assert_eq!(tensor.size(), 12);
        assert!(tensor.iter().all(|&x| x == 1.0));
        assert!(Tensor::from_vec(&[2, 2], vec![1.0f32; 3]).is_err());
        assert!(tensor.reshape(&[12]).is_ok());
        assert!(tensor.reshape(&[5]).is_err());
    }

    #[test]
    fn batch_slices_are_contiguous() {
        let tensor = Tensor::from_vec(&[2, 1, 2, 3], (0..12).collect::<Vec<i32>>()).unwrap();
        assert_eq!(tensor.batch_stride(), 4);
        assert_eq!(tensor.batch(2), &[8, 9, 10, 11]);
        assert_eq!(tensor.at(1, 0, 1, 1), 7);
    }

    #[test]
    fn device_round_trip() {
        let ctx = context();
        let backend = Backend::device(&ctx);
        let mut tensor = SharedTensor::from_tensor(Tensor::from_vec(&[4], vec![1.0f64, 2.0, 3.0, 4.0]).unwrap());
        tensor.synchronize_to_device(&backend).unwrap();
        assert_eq!(tensor.latest(), Latest::Both);
        assert_eq!(ctx.transfers(), 1);

        tensor.device_mut().unwrap();
        assert_eq!(tensor.latest(), Latest::Device);
        assert!(tensor.host().is_err());
        assert!(tensor.read(&Backend::Native).is_err());

        tensor.synchronize_to_host(&backend).unwrap();
        assert_eq!(tensor.host().unwrap().as_slice(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(ctx.transfers(), 2);
    }

    #[test]
    fn native_backend_never_touches_a_device() {
        let mut tensor = SharedTensor::<f32>::new(&[2, 2]);
        tensor.synchronize_to_device(&Backend::Native).unwrap();
        assert_eq!(tensor.latest(), Latest::Host);
        assert!(tensor.device().is_err());
        assert!(!Backend::Native.is_accelerated());
    }

    #[test]
    fn element_types_carry_their_kind() {
        assert_eq!(<f16 as Float>::KIND, NumericKind::Half);
        assert_eq!(<f32 as Float>::KIND, NumericKind::Single);
        assert_eq!(<f64 as Float>::KIND, NumericKind::Double);
        assert_eq!(f16::cast(0.5).as_f64(), 0.5);
    }
}
